//
//  Sample application.
//
//  Serves an in-memory tree on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/
//
//  With --user name:password (repeatable) Basic and Digest authentication
//  are required.
//

use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::future::TryFutureExt;

use dav_engine::{
    AuthenticationService, DavEvent, DavHandler, EventListener, MemFs, MemLs, MemNonceProvider,
    SecurityManager, SimpleSecurityManager,
};

struct LogEvents;

impl EventListener for LogEvents {
    fn on_event(&self, event: &DavEvent) {
        match event {
            DavEvent::ProcessResourceStart { .. } | DavEvent::ProcessResourceFinish { .. } => {
                log::trace!("{:?}", event)
            }
            _ => log::info!("{:?}", event),
        }
    }
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// user:password, may be given more than once
    #[arg(short, long)]
    user: Vec<String>,
    /// realm for authentication
    #[arg(short, long, default_value = "dav-engine")]
    realm: String,
    /// digest nonce lifetime in seconds
    #[arg(long, default_value = "300")]
    nonce_validity: u64,
    /// return an index for GET on a collection
    #[arg(short, long)]
    autoindex: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut users = HashMap::new();
    for u in &cli.user {
        match u.split_once(':') {
            Some((name, pw)) => users.insert(name.to_string(), pw.to_string()),
            None => return Err(format!("bad --user {u}, expected name:password").into()),
        };
    }

    let nonces = Arc::new(MemNonceProvider::new(Duration::from_secs(cli.nonce_validity)));
    let _reaper = nonces.spawn_reaper(Duration::from_secs(60));

    let security: Option<Arc<dyn SecurityManager>> = if users.is_empty() {
        None
    } else {
        Some(Arc::new(SimpleSecurityManager::new(cli.realm.clone(), users)))
    };
    let dav_server = DavHandler::builder(MemFs::with(MemLs::new(), security))
        .authentication(AuthenticationService::basic_and_digest(nonces))
        .event_listener(Arc::new(LogEvents))
        .autoindex(cli.autoindex)
        .build();

    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = format!("0.0.0.0:{}", cli.port);
    let addr = SocketAddr::from_str(&addr)?;

    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!("Serving memory tree on {}", cli.port);
    let _ = server.await;
    Ok(())
}
