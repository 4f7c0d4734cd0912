use std::sync::Arc;

use http::StatusCode;

use crate::davpath::encode_segment;
use crate::errors::DavError;
use crate::props::{find_source, PropFindResponse, PropName, PropertiesRequest, PropertySource};
use crate::resource::{Caps, DavResource};
use crate::DavResult;

/// Resolves properties for PROPFIND.
#[derive(Clone)]
pub struct PropFindPropertyBuilder {
    sources: Arc<Vec<Arc<dyn PropertySource>>>,
}

/// Collections end in a slash, and a bare `&` is encoded.
pub(crate) fn fix_href(href: &str, is_collection: bool) -> String {
    let mut href = href.replace('&', "%26");
    if is_collection && !href.ends_with('/') {
        href.push('/');
    }
    href
}

impl PropFindPropertyBuilder {
    pub fn new(sources: Arc<Vec<Arc<dyn PropertySource>>>) -> PropFindPropertyBuilder {
        PropFindPropertyBuilder { sources }
    }

    /// Pre-order walk from `res` down to `depth` levels, one response per
    /// property-queryable resource visited.
    pub async fn build_properties(
        &self,
        res: &dyn DavResource,
        href: &str,
        depth: usize,
        request: &PropertiesRequest,
    ) -> DavResult<Vec<PropFindResponse>> {
        let is_coll = res.caps().contains(Caps::COLLECTION);
        let href = fix_href(href, is_coll);
        let mut out = vec![self.process_resource(res, &href, request)];
        if depth == 0 || !is_coll {
            return Ok(out);
        }

        let mut stack = self.children_of(res, &href, 1).await?;
        while let Some((res, href, level)) = stack.pop() {
            out.push(self.process_resource(res.as_ref(), &href, request));
            if level < depth && res.caps().contains(Caps::COLLECTION) {
                let next = self.children_of(res.as_ref(), &href, level + 1).await?;
                stack.extend(next);
            }
        }
        Ok(out)
    }

    // queryable children with their hrefs, reversed so that popping them
    // off a stack visits the first child first.
    async fn children_of(
        &self,
        res: &dyn DavResource,
        href: &str,
        level: usize,
    ) -> DavResult<Vec<(Box<dyn DavResource>, String, usize)>> {
        let mut next = Vec::new();
        for child in res.children().await? {
            let caps = child.caps();
            if !caps.contains(Caps::PROPFINDABLE) {
                continue;
            }
            let child_href = fix_href(
                &format!("{}{}", href, encode_segment(&child.name())),
                caps.contains(Caps::COLLECTION),
            );
            next.push((child, child_href, level));
        }
        next.reverse();
        Ok(next)
    }

    /// Resolve the requested properties of one resource.
    pub fn process_resource(
        &self,
        res: &dyn DavResource,
        href: &str,
        request: &PropertiesRequest,
    ) -> PropFindResponse {
        let mut resp = PropFindResponse::new(href);
        let (names, values) = match request {
            PropertiesRequest::AllProp => (self.all_names(res), true),
            PropertiesRequest::PropName => (self.all_names(res), false),
            PropertiesRequest::Named(names) => (names.clone(), true),
        };
        for name in names {
            if name.name == "href" {
                resp.add_known(name, Some(super::PropValue::Text(href.to_string())));
                continue;
            }
            let source = match find_source(&self.sources, &name, res) {
                Some((s, _)) => s,
                None => {
                    resp.add_error(StatusCode::NOT_FOUND, name, None);
                    continue;
                }
            };
            if !values {
                resp.add_known(name, None);
                continue;
            }
            match source.get_value(&name, res) {
                Ok(Some(v)) => resp.add_known(name, Some(v)),
                // claimed, but not present on this resource.
                Ok(None) => resp.add_error(StatusCode::NOT_FOUND, name, None),
                Err(DavError::NotAuthorized(_)) => resp.add_error(
                    StatusCode::UNAUTHORIZED,
                    name,
                    Some("Not authorised".to_string()),
                ),
                Err(e) => {
                    debug!("property {} on {}: {}", name, href, e);
                    resp.add_error(e.statuscode(), name, Some(e.to_string()))
                }
            }
        }
        resp
    }

    /// Union of the names offered by all sources, in source order.
    fn all_names(&self, res: &dyn DavResource) -> Vec<PropName> {
        let mut names: Vec<PropName> = Vec::new();
        for s in self.sources.iter() {
            for n in s.all_names(res) {
                if !names.contains(&n) {
                    names.push(n);
                }
            }
        }
        names
    }
}
