//! Multistatus and LOCK response bodies, rendered into a `String`.
use std::fmt::Write as _;

use http::StatusCode;
use xml::escape::escape_str_pcdata;
use xmltree::{Element, EmitterConfig};

use crate::errors::DavError;
use crate::ls::{LockDepth, LockScope, LockToken};
use crate::props::{PropFindResponse, PropName, PropValue};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::DAV_NS;
use crate::DavResult;

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n";

fn status_line(code: u16) -> String {
    let reason = StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("");
    format!("HTTP/1.1 {code} {reason}")
}

/// Prefix allocation for the non-DAV: namespaces in a document.
struct Namespaces(Vec<String>);

impl Namespaces {
    fn collect(responses: &[PropFindResponse]) -> Namespaces {
        let mut ns: Vec<String> = Vec::new();
        let mut add = |n: &PropName| {
            if !n.is_dav() && !n.ns.is_empty() && !ns.contains(&n.ns) {
                ns.push(n.ns.clone());
            }
        };
        for r in responses {
            for (name, value) in &r.known {
                add(name);
                if let Some(PropValue::ResourceType(types)) = value {
                    types.iter().for_each(&mut add);
                }
            }
            for errs in r.errors.values() {
                errs.iter().for_each(|e| add(&e.name));
            }
        }
        Namespaces(ns)
    }

    fn declarations(&self) -> String {
        let mut s = format!("xmlns:D=\"{DAV_NS}\"");
        for (i, ns) in self.0.iter().enumerate() {
            let _ = write!(s, " xmlns:ns{}=\"{}\"", i + 1, escape_str_pcdata(ns));
        }
        s
    }

    /// Opening tag name, plus an attribute if the name has no namespace.
    fn tag(&self, name: &PropName) -> (String, &'static str) {
        if name.is_dav() {
            (format!("D:{}", name.name), "")
        } else if name.ns.is_empty() {
            (name.name.clone(), " xmlns=\"\"")
        } else {
            let idx = self.0.iter().position(|n| n == &name.ns).unwrap_or(0);
            (format!("ns{}:{}", idx + 1, name.name), "")
        }
    }

    fn empty(&self, out: &mut String, name: &PropName) {
        let (tag, attr) = self.tag(name);
        let _ = write!(out, "<{tag}{attr}/>");
    }

    fn text(&self, out: &mut String, name: &PropName, text: &str) {
        let (tag, attr) = self.tag(name);
        let _ = write!(out, "<{tag}{attr}>{}</{tag}>", escape_str_pcdata(text));
    }
}

fn write_element(out: &mut String, elem: &Element) -> DavResult<()> {
    let mut buf = Vec::new();
    elem.write_with_config(
        &mut buf,
        EmitterConfig::new().write_document_declaration(false),
    )
    .map_err(|e| DavError::Internal(format!("cannot serialize {}: {e}", elem.name)))?;
    out.push_str(std::str::from_utf8(&buf)?);
    Ok(())
}

fn write_value(
    out: &mut String,
    ns: &Namespaces,
    name: &PropName,
    value: Option<&PropValue>,
    href: &str,
) -> DavResult<()> {
    let value = match value {
        Some(v) => v,
        None => {
            ns.empty(out, name);
            return Ok(());
        }
    };
    match value {
        PropValue::Empty => ns.empty(out, name),
        PropValue::Text(t) => ns.text(out, name, t),
        PropValue::Long(n) => ns.text(out, name, &n.to_string()),
        PropValue::Bool(b) => ns.text(out, name, if *b { "true" } else { "false" }),
        PropValue::Date(t) => ns.text(out, name, &systemtime_to_rfc3339(*t)),
        PropValue::HttpDate(t) => ns.text(out, name, &systemtime_to_httpdate(*t)),
        PropValue::ResourceType(types) if types.is_empty() => ns.empty(out, name),
        PropValue::ResourceType(types) => {
            let (tag, attr) = ns.tag(name);
            let _ = write!(out, "<{tag}{attr}>");
            for t in types {
                ns.empty(out, t);
            }
            let _ = write!(out, "</{tag}>");
        }
        PropValue::LockDiscovery(None) => ns.empty(out, name),
        PropValue::LockDiscovery(Some(token)) => {
            out.push_str("<D:lockdiscovery>");
            write_activelock(out, token, href);
            out.push_str("</D:lockdiscovery>");
        }
        PropValue::SupportedLock => write_supportedlock(out),
        PropValue::Xml(elem) => write_element(out, elem)?,
    }
    Ok(())
}

fn write_supportedlock(out: &mut String) {
    out.push_str("<D:supportedlock>");
    for scope in ["exclusive", "shared"] {
        let _ = write!(
            out,
            "<D:lockentry><D:lockscope><D:{scope}/></D:lockscope>\
             <D:locktype><D:write/></D:locktype></D:lockentry>"
        );
    }
    out.push_str("</D:supportedlock>");
}

/// One `<D:activelock>` element.
pub(crate) fn write_activelock(out: &mut String, token: &LockToken, root: &str) {
    let scope = match token.info.scope {
        LockScope::Exclusive => "exclusive",
        LockScope::Shared => "shared",
    };
    let depth = match token.info.depth {
        LockDepth::Zero => "0",
        LockDepth::Infinity => "infinity",
    };
    out.push_str("<D:activelock>\n");
    out.push_str("<D:locktype><D:write/></D:locktype>\n");
    let _ = writeln!(out, "<D:lockscope><D:{scope}/></D:lockscope>");
    let _ = writeln!(out, "<D:depth>{depth}</D:depth>");
    if let Some(owner) = &token.info.locked_by_user {
        let _ = writeln!(out, "<D:owner>{}</D:owner>", escape_str_pcdata(owner));
    }
    let _ = writeln!(out, "<D:timeout>{}</D:timeout>", token.timeout);
    let _ = writeln!(
        out,
        "<D:locktoken><D:href>opaquelocktoken:{}</D:href></D:locktoken>",
        escape_str_pcdata(&token.token_id)
    );
    let _ = writeln!(
        out,
        "<D:lockroot><D:href>{}</D:href></D:lockroot>",
        escape_str_pcdata(root)
    );
    out.push_str("</D:activelock>\n");
}

/// Body of a successful LOCK.
pub(crate) fn lock_response(token: &LockToken, root: &str) -> String {
    let mut out = String::from(XML_DECL);
    out.push_str("<D:prop xmlns:D=\"DAV:\"><D:lockdiscovery>\n");
    write_activelock(&mut out, token, root);
    out.push_str("</D:lockdiscovery></D:prop>\n");
    out
}

/// A `<D:multistatus>` document with one `<D:response>` per entry and one
/// `<D:propstat>` per status.
pub(crate) fn multistatus(responses: &[PropFindResponse]) -> DavResult<String> {
    let ns = Namespaces::collect(responses);
    let mut out = String::from(XML_DECL);
    let _ = writeln!(out, "<D:multistatus {}>", ns.declarations());
    for r in responses {
        out.push_str("<D:response>\n");
        let _ = writeln!(out, "<D:href>{}</D:href>", escape_str_pcdata(&r.href));
        if !r.known.is_empty() || r.errors.is_empty() {
            out.push_str("<D:propstat>\n<D:prop>\n");
            for (name, value) in &r.known {
                write_value(&mut out, &ns, name, value.as_ref(), &r.href)?;
                out.push('\n');
            }
            out.push_str("</D:prop>\n");
            let _ = writeln!(out, "<D:status>{}</D:status>", status_line(200));
            out.push_str("</D:propstat>\n");
        }
        for (code, errs) in &r.errors {
            out.push_str("<D:propstat>\n<D:prop>\n");
            for e in errs {
                ns.empty(&mut out, &e.name);
                out.push('\n');
            }
            out.push_str("</D:prop>\n");
            let _ = writeln!(out, "<D:status>{}</D:status>", status_line(*code));
            let descr: Vec<&str> = errs.iter().filter_map(|e| e.error.as_deref()).collect();
            if !descr.is_empty() {
                let _ = writeln!(
                    out,
                    "<D:responsedescription>{}</D:responsedescription>",
                    escape_str_pcdata(&descr.join("; "))
                );
            }
            out.push_str("</D:propstat>\n");
        }
        out.push_str("</D:response>\n");
    }
    out.push_str("</D:multistatus>\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ls::{LockInfo, LockTimeout, LockType};
    use crate::xmltree_ext::{parse_body, ElementExt};
    use std::time::SystemTime;

    fn token() -> LockToken {
        LockToken {
            token_id: "abc-123".to_string(),
            info: LockInfo {
                scope: LockScope::Exclusive,
                lock_type: LockType::Write,
                depth: LockDepth::Infinity,
                owner: Some("<ejw>".to_string()),
                locked_by_user: Some("<ejw>".to_string()),
            },
            timeout: LockTimeout::Seconds(3600),
            issued_at: SystemTime::now(),
        }
    }

    #[test]
    fn lock_body() {
        let body = lock_response(&token(), "http://h/a/b.txt");
        assert!(body.contains("<D:locktype><D:write/></D:locktype>"));
        assert!(body.contains("<D:lockscope><D:exclusive/></D:lockscope>"));
        assert!(body.contains("<D:timeout>Second-3600</D:timeout>"));
        assert!(body.contains("<D:href>opaquelocktoken:abc-123</D:href>"));
        assert!(body.contains("<D:owner>&lt;ejw&gt;</D:owner>"));
        // and it is well formed.
        let e = parse_body(body.as_bytes()).unwrap().unwrap();
        assert!(e.is_dav("prop"));
    }

    #[test]
    fn propstat_per_status() {
        let mut r = PropFindResponse::new("/a%26b/");
        r.add_known(
            PropName::dav("resourcetype"),
            Some(PropValue::ResourceType(vec![PropName::dav("collection")])),
        );
        r.add_known(PropName::new("urn:z", "color"), Some(PropValue::Text("a<b".to_string())));
        r.add_known(PropName::dav("supportedlock"), Some(PropValue::SupportedLock));
        r.add_error(StatusCode::NOT_FOUND, PropName::new("urn:y", "nope"), None);
        r.add_error(
            StatusCode::UNAUTHORIZED,
            PropName::new("", "bare"),
            Some("Not authorised".to_string()),
        );
        let body = multistatus(&[r]).unwrap();
        assert!(body.contains("xmlns:ns1=\"urn:z\" xmlns:ns2=\"urn:y\""));
        assert!(body.contains("<D:resourcetype><D:collection/></D:resourcetype>"));
        assert!(body.contains("<ns1:color>a&lt;b</ns1:color>"));
        assert!(body.contains("<bare xmlns=\"\"/>"));
        assert!(body.contains("HTTP/1.1 404 Not Found"));
        assert!(body.contains("HTTP/1.1 401 Unauthorized"));
        assert!(body.contains("<D:responsedescription>Not authorised</D:responsedescription>"));

        let doc = parse_body(body.as_bytes()).unwrap().unwrap();
        let response = doc.dav_child("response").unwrap();
        assert_eq!(response.dav_child("href").unwrap().text_content(), "/a%26b/");
        let propstats: Vec<_> = response
            .child_elems()
            .into_iter()
            .filter(|e| e.is_dav("propstat"))
            .collect();
        assert_eq!(propstats.len(), 3);
    }

    #[test]
    fn dead_property_xml_is_copied() {
        let elem = parse_body(br#"<Z:Author xmlns:Z="urn:z">Jim <Z:b>W</Z:b></Z:Author>"#)
            .unwrap()
            .unwrap();
        let mut r = PropFindResponse::new("/doc");
        r.add_known(PropName::new("urn:z", "Author"), Some(PropValue::Xml(elem)));
        let body = multistatus(&[r]).unwrap();
        let doc = parse_body(body.as_bytes()).unwrap().unwrap();
        let prop = doc
            .dav_child("response")
            .and_then(|r| r.dav_child("propstat"))
            .and_then(|p| p.dav_child("prop"))
            .unwrap();
        let children = prop.child_elems();
        let author = children[0];
        assert_eq!(author.prop_name(), PropName::new("urn:z", "Author"));
        assert_eq!(author.text_content(), "Jim W");
    }
}
