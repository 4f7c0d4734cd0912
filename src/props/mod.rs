//! The property engine.
//!
//! Properties come from an ordered list of [`PropertySource`]s. For any
//! name, the first source that knows about it owns it; later sources never
//! see that name. PROPFIND walks a tree of resources through
//! [`PropFindPropertyBuilder`], PROPPATCH goes through [`do_prop_patch`].
//!
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use http::StatusCode;
use xmltree::Element;

use crate::errors::DavError;
use crate::ls::LockToken;
use crate::resource::DavResource;
use crate::xmltree_ext::{ElementExt, DAV_NS};
use crate::DavResult;

pub mod propfind;
pub mod proppatch;
pub mod standard;
pub(crate) mod xmlwrite;

pub use propfind::PropFindPropertyBuilder;
pub use proppatch::{
    do_prop_patch, CheckResult, DefaultPropertyAuthoriser, PatchOp, PropPermission,
    PropertyAuthoriser,
};
pub use standard::{DavPropertySource, DeadPropertySource};

/// Qualified property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropName {
    pub ns: String,
    pub name: String,
}

impl PropName {
    pub fn new(ns: &str, name: &str) -> PropName {
        PropName {
            ns: ns.to_string(),
            name: name.to_string(),
        }
    }

    /// A name in the DAV: namespace.
    pub fn dav(name: &str) -> PropName {
        PropName::new(DAV_NS, name)
    }

    pub fn is_dav(&self) -> bool {
        self.ns == DAV_NS
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}{}", self.ns, self.name)
    }
}

/// Type of a property value, as advertised by its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    Text,
    Long,
    Bool,
    Date,
    HttpDate,
    ResourceType,
    LockDiscovery,
    SupportedLock,
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropAccess {
    ReadOnly,
    Writable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyMetaData {
    Unknown,
    Known {
        access: PropAccess,
        value_type: PropType,
    },
}

impl PropertyMetaData {
    pub fn read_only(value_type: PropType) -> Self {
        PropertyMetaData::Known {
            access: PropAccess::ReadOnly,
            value_type,
        }
    }

    pub fn writable(value_type: PropType) -> Self {
        PropertyMetaData::Known {
            access: PropAccess::Writable,
            value_type,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PropertyMetaData::Unknown)
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            PropertyMetaData::Known {
                access: PropAccess::Writable,
                ..
            }
        )
    }
}

/// A typed property value. Each variant has exactly one XML rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// Present, but without content.
    Empty,
    Text(String),
    Long(u64),
    Bool(bool),
    /// RFC3339, as used by `creationdate`.
    Date(SystemTime),
    /// RFC1123, as used by `getlastmodified`.
    HttpDate(SystemTime),
    ResourceType(Vec<PropName>),
    LockDiscovery(Option<LockToken>),
    SupportedLock,
    /// Dead property content, the element itself included.
    Xml(Element),
}

impl PropValue {
    /// Turn a PROPPATCH `<D:set>` element into a value of type `ty`.
    pub fn from_xml(ty: PropType, elem: &Element) -> DavResult<PropValue> {
        let text = || elem.text_content().trim().to_string();
        match ty {
            PropType::Text => Ok(PropValue::Text(text())),
            PropType::Long => text()
                .parse()
                .map(PropValue::Long)
                .map_err(|_| DavError::Conflict(format!("{} is not a number", elem.name))),
            PropType::Bool => match text().as_str() {
                "1" | "true" | "T" => Ok(PropValue::Bool(true)),
                "0" | "false" | "F" => Ok(PropValue::Bool(false)),
                _ => Err(DavError::Conflict(format!("{} is not a boolean", elem.name))),
            },
            PropType::Xml => Ok(PropValue::Xml(elem.clone())),
            _ => Err(DavError::Conflict(format!(
                "{} cannot be set from a request",
                elem.name
            ))),
        }
    }
}

/// A provider of named, typed properties.
pub trait PropertySource: Send + Sync {
    fn metadata(&self, name: &PropName, res: &dyn DavResource) -> PropertyMetaData;

    /// `Ok(None)` if the property has no value on this resource.
    fn get_value(&self, name: &PropName, res: &dyn DavResource) -> DavResult<Option<PropValue>>;

    /// Set (`Some`) or remove (`None`).
    fn set_value(
        &self,
        name: &PropName,
        res: &dyn DavResource,
        value: Option<PropValue>,
    ) -> DavResult<()>;

    fn all_names(&self, res: &dyn DavResource) -> Vec<PropName>;
}

/// Which properties a PROPFIND wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertiesRequest {
    AllProp,
    /// Names only, no values.
    PropName,
    Named(Vec<PropName>),
}

impl PropertiesRequest {
    /// From a PROPFIND body. No body means allprop.
    pub fn from_xml(elem: Option<&Element>) -> DavResult<PropertiesRequest> {
        let elem = match elem {
            Some(e) => e,
            None => return Ok(PropertiesRequest::AllProp),
        };
        if !elem.is_dav("propfind") {
            return Err(DavError::BadRequest("expected propfind".to_string()));
        }
        for child in elem.child_elems() {
            if child.is_dav("allprop") {
                return Ok(PropertiesRequest::AllProp);
            }
            if child.is_dav("propname") {
                return Ok(PropertiesRequest::PropName);
            }
            if child.is_dav("prop") {
                let mut names: Vec<PropName> = Vec::new();
                for p in child.child_elems() {
                    let n = p.prop_name();
                    if !names.contains(&n) {
                        names.push(n);
                    }
                }
                return Ok(PropertiesRequest::Named(names));
            }
        }
        Err(DavError::BadRequest("empty propfind".to_string()))
    }
}

/// A property that could not be returned, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct NameAndError {
    pub name: PropName,
    pub error: Option<String>,
}

/// Outcome for one resource of a PROPFIND or PROPPATCH.
#[derive(Debug, Clone, PartialEq)]
pub struct PropFindResponse {
    pub href: String,
    /// Resolved properties in request order. `None` for names-only
    /// responses and for successful patches.
    pub known: Vec<(PropName, Option<PropValue>)>,
    /// Per status code.
    pub errors: BTreeMap<u16, Vec<NameAndError>>,
}

impl PropFindResponse {
    pub fn new(href: impl Into<String>) -> PropFindResponse {
        PropFindResponse {
            href: href.into(),
            known: Vec::new(),
            errors: BTreeMap::new(),
        }
    }

    pub fn add_known(&mut self, name: PropName, value: Option<PropValue>) {
        self.known.push((name, value));
    }

    pub fn add_error(&mut self, status: StatusCode, name: PropName, error: Option<String>) {
        self.errors
            .entry(status.as_u16())
            .or_default()
            .push(NameAndError { name, error });
    }

    pub fn value(&self, name: &PropName) -> Option<&PropValue> {
        self.known
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn is_known(&self, name: &PropName) -> bool {
        self.known.iter().any(|(n, _)| n == name)
    }

    /// Status code reported for `name`, if it is in the error list.
    pub fn error_status(&self, name: &PropName) -> Option<u16> {
        self.errors
            .iter()
            .find(|(_, v)| v.iter().any(|e| &e.name == name))
            .map(|(s, _)| *s)
    }
}

/// First source that knows `name`, and what it says about it.
pub(crate) fn find_source<'a>(
    sources: &'a [std::sync::Arc<dyn PropertySource>],
    name: &PropName,
    res: &dyn DavResource,
) -> Option<(&'a dyn PropertySource, PropertyMetaData)> {
    sources.iter().find_map(|s| {
        let meta = s.metadata(name, res);
        if meta.is_unknown() {
            None
        } else {
            Some((s.as_ref(), meta))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree_ext::parse_body;

    #[test]
    fn propfind_bodies() {
        assert_eq!(
            PropertiesRequest::from_xml(None).unwrap(),
            PropertiesRequest::AllProp
        );
        let e = parse_body(br#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            PropertiesRequest::from_xml(Some(&e)).unwrap(),
            PropertiesRequest::PropName
        );
        let e = parse_body(
            br#"<D:propfind xmlns:D="DAV:" xmlns:Z="urn:z">
                  <D:prop><D:getetag/><Z:color/><D:getetag/></D:prop>
                </D:propfind>"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            PropertiesRequest::from_xml(Some(&e)).unwrap(),
            PropertiesRequest::Named(vec![PropName::dav("getetag"), PropName::new("urn:z", "color")])
        );
        let e = parse_body(br#"<D:lockinfo xmlns:D="DAV:"/>"#).unwrap().unwrap();
        assert!(PropertiesRequest::from_xml(Some(&e)).is_err());
    }

    #[test]
    fn values_from_xml() {
        let e = parse_body(br#"<Z:n xmlns:Z="urn:z"> 42 </Z:n>"#).unwrap().unwrap();
        assert_eq!(PropValue::from_xml(PropType::Long, &e).unwrap(), PropValue::Long(42));
        assert_eq!(
            PropValue::from_xml(PropType::Text, &e).unwrap(),
            PropValue::Text("42".to_string())
        );
        assert!(PropValue::from_xml(PropType::Bool, &e).is_err());
        assert!(PropValue::from_xml(PropType::Date, &e).is_err());
    }
}
