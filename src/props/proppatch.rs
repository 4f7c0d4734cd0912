//! PROPPATCH.
//!
//! Permission for every name in the request is checked before anything is
//! changed. Failures after that point are reported per property.
use std::sync::Arc;

use http::StatusCode;
use xmltree::Element;

use crate::context::DavRequest;
use crate::errors::DavError;
use crate::props::{find_source, PropFindResponse, PropName, PropValue, PropertySource};
use crate::resource::DavResource;
use crate::util::DavMethod;
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

/// One `<D:set>` or `<D:remove>` entry, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set(PropName, Element),
    Remove(PropName),
}

impl PatchOp {
    pub fn name(&self) -> &PropName {
        match self {
            PatchOp::Set(n, _) => n,
            PatchOp::Remove(n) => n,
        }
    }

    /// Parse a `<D:propertyupdate>` element.
    pub fn parse(elem: &Element) -> DavResult<Vec<PatchOp>> {
        if !elem.is_dav("propertyupdate") {
            return Err(DavError::BadRequest("expected propertyupdate".to_string()));
        }
        let mut ops = Vec::new();
        for action in elem.child_elems() {
            let set = if action.is_dav("set") {
                true
            } else if action.is_dav("remove") {
                false
            } else {
                continue;
            };
            for prop in action.child_elems().into_iter().filter(|e| e.is_dav("prop")) {
                for p in prop.child_elems() {
                    let name = p.prop_name();
                    if set {
                        ops.push(PatchOp::Set(name, p.clone()));
                    } else {
                        ops.push(PatchOp::Remove(name));
                    }
                }
            }
        }
        Ok(ops)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropPermission {
    Read,
    Write,
}

/// A name the requester may not touch, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: PropName,
    pub reason: String,
}

/// Decides per property name whether a request may read or write it.
pub trait PropertyAuthoriser: Send + Sync {
    /// Returns the names that are denied. Empty means go ahead.
    fn check_permissions(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
        permission: PropPermission,
        names: &[PropName],
        sources: &[Arc<dyn PropertySource>],
    ) -> Vec<CheckResult>;
}

/// The resource must authorise the method, and for writes every name that
/// is claimed by a source must be writable there.
#[derive(Debug, Default, Clone)]
pub struct DefaultPropertyAuthoriser;

impl PropertyAuthoriser for DefaultPropertyAuthoriser {
    fn check_permissions(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
        permission: PropPermission,
        names: &[PropName],
        sources: &[Arc<dyn PropertySource>],
    ) -> Vec<CheckResult> {
        let method = match permission {
            PropPermission::Read => DavMethod::PROPFIND,
            PropPermission::Write => DavMethod::PROPPATCH,
        };
        if !res.authorise(req, method, req.auth()) {
            return names
                .iter()
                .map(|n| CheckResult {
                    name: n.clone(),
                    reason: "not authorised".to_string(),
                })
                .collect();
        }
        if permission == PropPermission::Read {
            return Vec::new();
        }
        names
            .iter()
            .filter_map(|n| match find_source(sources, n, res) {
                Some((_, meta)) if !meta.is_writable() => Some(CheckResult {
                    name: n.clone(),
                    reason: "read-only".to_string(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Apply `ops` to `res`. All-or-nothing at the permission stage: if any
/// name is denied nothing is changed and the result is `NotAuthorized`.
pub fn do_prop_patch(
    req: &DavRequest,
    res: &dyn DavResource,
    href: &str,
    ops: &[PatchOp],
    sources: &[Arc<dyn PropertySource>],
    authoriser: &dyn PropertyAuthoriser,
) -> DavResult<PropFindResponse> {
    let mut names: Vec<PropName> = Vec::new();
    for op in ops {
        if !names.contains(op.name()) {
            names.push(op.name().clone());
        }
    }
    let denied = authoriser.check_permissions(req, res, PropPermission::Write, &names, sources);
    if !denied.is_empty() {
        for d in &denied {
            debug!("proppatch {}: {} denied ({})", href, d.name, d.reason);
        }
        return Err(DavError::NotAuthorized(Vec::new()));
    }

    // one outcome per name: once a name has failed, later operations on
    // it are skipped and the failure is what gets reported.
    let mut outcomes: Vec<(PropName, Result<(), (StatusCode, Option<String>)>)> =
        names.into_iter().map(|n| (n, Ok(()))).collect();
    for op in ops {
        let slot = match outcomes.iter_mut().find(|o| &o.0 == op.name()) {
            Some((_, slot)) if slot.is_ok() => slot,
            _ => continue,
        };
        let name = op.name();
        let (source, meta) = match find_source(sources, name, res) {
            Some(s) => s,
            None => {
                *slot = Err((StatusCode::NOT_FOUND, None));
                continue;
            }
        };
        let value = match (op, meta) {
            (PatchOp::Remove(_), _) => Ok(None),
            (PatchOp::Set(_, elem), crate::props::PropertyMetaData::Known { value_type, .. }) => {
                PropValue::from_xml(value_type, elem).map(Some)
            }
            (PatchOp::Set(..), _) => Err(DavError::Conflict("unknown property".to_string())),
        };
        if let Err(e) = value.and_then(|v| source.set_value(name, res, v)) {
            debug!("proppatch {}: {} failed: {}", href, name, e);
            *slot = Err((e.statuscode(), Some(e.to_string())));
        }
    }

    let mut resp = PropFindResponse::new(href);
    for (name, outcome) in outcomes {
        match outcome {
            Ok(()) => resp.add_known(name, None),
            Err((status, error)) => resp.add_error(status, name, error),
        }
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::request;
    use crate::props::{DavPropertySource, DeadPropertySource};
    use crate::resource::Caps;
    use crate::xmltree_ext::parse_body;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Doc {
        props: Mutex<Vec<(PropName, Element)>>,
        read_only: bool,
        refuse_set: Option<&'static str>,
    }

    impl DavResource for Doc {
        fn name(&self) -> String {
            "doc".to_string()
        }
        fn caps(&self) -> Caps {
            Caps::PROPFINDABLE | Caps::CUSTOM_PROPS
        }
        fn authorise(&self, _req: &DavRequest, method: DavMethod, _a: Option<&crate::auth::Auth>) -> bool {
            !(self.read_only && method == DavMethod::PROPPATCH)
        }
        fn dead_props(&self) -> Vec<(PropName, Element)> {
            self.props.lock().clone()
        }
        fn set_dead_prop(&self, name: &PropName, value: Option<Element>) -> DavResult<()> {
            if value.is_some() && self.refuse_set == Some(name.name.as_str()) {
                return Err(DavError::Conflict(format!("{name} is frozen")));
            }
            let mut props = self.props.lock();
            props.retain(|(n, _)| n != name);
            if let Some(v) = value {
                props.push((name.clone(), v));
            }
            Ok(())
        }
    }

    fn sources() -> Vec<Arc<dyn PropertySource>> {
        vec![Arc::new(DavPropertySource), Arc::new(DeadPropertySource)]
    }

    fn ops(body: &str) -> Vec<PatchOp> {
        PatchOp::parse(&parse_body(body.as_bytes()).unwrap().unwrap()).unwrap()
    }

    const SET_AND_REMOVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/">
          <D:set><D:prop><Z:Author>Jim Whitehead</Z:Author></D:prop></D:set>
          <D:remove><D:prop><Z:Copyright-Owner/></D:prop></D:remove>
        </D:propertyupdate>"#;

    #[test]
    fn parse_keeps_document_order() {
        let ops = ops(SET_AND_REMOVE);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], PatchOp::Set(n, _) if n.name == "Author"));
        assert!(matches!(&ops[1], PatchOp::Remove(n) if n.name == "Copyright-Owner"));
    }

    #[test]
    fn set_and_remove_dead_props() {
        let doc = Doc::default();
        let req = request(None);
        let r = do_prop_patch(&req, &doc, "/doc", &ops(SET_AND_REMOVE), &sources(), &DefaultPropertyAuthoriser)
            .unwrap();
        assert_eq!(r.known.len(), 2);
        assert!(r.errors.is_empty());
        let props = doc.dead_props();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].1.text_content(), "Jim Whitehead");
    }

    #[test]
    fn one_read_only_name_blocks_everything() {
        let doc = Doc::default();
        let req = request(None);
        let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:set><D:prop><Z:a>1</Z:a></D:prop></D:set>
              <D:set><D:prop><D:getetag>"x"</D:getetag><D:displayname>n</D:displayname></D:prop></D:set>
            </D:propertyupdate>"#;
        let res = do_prop_patch(&req, &doc, "/doc", &ops(body), &sources(), &DefaultPropertyAuthoriser);
        assert!(matches!(res, Err(DavError::NotAuthorized(_))));
        assert!(doc.dead_props().is_empty());
    }

    #[test]
    fn resource_refusal_blocks_everything() {
        let doc = Doc {
            read_only: true,
            ..Doc::default()
        };
        let req = request(None);
        let res = do_prop_patch(&req, &doc, "/doc", &ops(SET_AND_REMOVE), &sources(), &DefaultPropertyAuthoriser);
        assert!(matches!(res, Err(DavError::NotAuthorized(_))));
        assert!(doc.dead_props().is_empty());
    }

    #[test]
    fn unclaimed_names_are_reported_not_found() {
        // no CUSTOM_PROPS source at all: nobody claims the name.
        let doc = Doc::default();
        let req = request(None);
        let only_live: Vec<Arc<dyn PropertySource>> = vec![Arc::new(DavPropertySource)];
        let r = do_prop_patch(&req, &doc, "/doc", &ops(SET_AND_REMOVE), &only_live, &DefaultPropertyAuthoriser)
            .unwrap();
        assert_eq!(r.errors.get(&404).map(|v| v.len()), Some(2));
    }

    #[test]
    fn repeated_name_gets_one_outcome() {
        let doc = Doc {
            refuse_set: Some("a"),
            ..Doc::default()
        };
        let req = request(None);
        let a = PropName::new("urn:z", "a");

        // remove succeeds, the following set fails.
        let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:remove><D:prop><Z:a/></D:prop></D:remove>
              <D:set><D:prop><Z:a>1</Z:a><Z:b>2</Z:b></D:prop></D:set>
            </D:propertyupdate>"#;
        let r = do_prop_patch(&req, &doc, "/doc", &ops(body), &sources(), &DefaultPropertyAuthoriser)
            .unwrap();
        assert!(!r.is_known(&a));
        assert_eq!(r.error_status(&a), Some(409));
        assert_eq!(r.known.len(), 1);
        assert_eq!(r.errors.values().map(|v| v.len()).sum::<usize>(), 1);

        // set fails first, the later remove is not applied.
        let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:set><D:prop><Z:a>1</Z:a></D:prop></D:set>
              <D:remove><D:prop><Z:b/></D:prop></D:remove>
              <D:remove><D:prop><Z:a/></D:prop></D:remove>
            </D:propertyupdate>"#;
        let r = do_prop_patch(&req, &doc, "/doc", &ops(body), &sources(), &DefaultPropertyAuthoriser)
            .unwrap();
        assert!(!r.is_known(&a));
        assert_eq!(r.error_status(&a), Some(409));
        assert!(r.is_known(&PropName::new("urn:z", "b")));
        assert!(doc.dead_props().is_empty());
    }

    #[test]
    fn repeated_set_keeps_last_value() {
        let doc = Doc::default();
        let req = request(None);
        let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:set><D:prop><Z:a>1</Z:a></D:prop></D:set>
              <D:set><D:prop><Z:a>2</Z:a></D:prop></D:set>
            </D:propertyupdate>"#;
        let r = do_prop_patch(&req, &doc, "/doc", &ops(body), &sources(), &DefaultPropertyAuthoriser)
            .unwrap();
        assert_eq!(r.known.len(), 1);
        assert!(r.errors.is_empty());
        assert_eq!(doc.dead_props()[0].1.text_content(), "2");
    }
}
