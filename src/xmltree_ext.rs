use xmltree::{Element, XMLNode};

use crate::errors::DavError;
use crate::props::PropName;
use crate::DavResult;

pub(crate) const DAV_NS: &str = "DAV:";

/// Parse a request body. An empty body is `None`.
pub(crate) fn parse_body(body: &[u8]) -> DavResult<Option<Element>> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    let elem = Element::parse(body).map_err(|e| {
        debug!("xml parse error: {}", e);
        DavError::XmlParseError
    })?;
    Ok(Some(elem))
}

pub(crate) trait ElementExt {
    /// Child elements, skipping text, comments and the like.
    fn child_elems(&self) -> Vec<&Element>;
    /// Is this `<D:name>` in the DAV: namespace.
    fn is_dav(&self, name: &str) -> bool;
    /// First child element `<D:name>`.
    fn dav_child(&self, name: &str) -> Option<&Element>;
    /// All text below this element, concatenated.
    fn text_content(&self) -> String;
    fn prop_name(&self) -> PropName;
}

impl ElementExt for Element {
    fn child_elems(&self) -> Vec<&Element> {
        self.children
            .iter()
            .filter_map(|n| match n {
                XMLNode::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(DAV_NS)
    }

    fn dav_child(&self, name: &str) -> Option<&Element> {
        self.child_elems().into_iter().find(|e| e.is_dav(name))
    }

    fn text_content(&self) -> String {
        let mut s = String::new();
        for n in &self.children {
            match n {
                XMLNode::Text(t) | XMLNode::CData(t) => s.push_str(t),
                XMLNode::Element(e) => s.push_str(&e.text_content()),
                _ => {}
            }
        }
        s
    }

    fn prop_name(&self) -> PropName {
        PropName::new(self.namespace.as_deref().unwrap_or(""), &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dav_children() {
        let body = br#"<?xml version="1.0"?>
            <D:lockinfo xmlns:D="DAV:" xmlns:X="urn:x">
              <D:lockscope><D:exclusive/></D:lockscope>
              <X:other/>
              <D:owner><D:href>mailto:me</D:href></D:owner>
            </D:lockinfo>"#;
        let e = parse_body(body).unwrap().unwrap();
        assert!(e.is_dav("lockinfo"));
        assert_eq!(e.child_elems().len(), 3);
        assert_eq!(e.dav_child("owner").unwrap().text_content(), "mailto:me");
        assert!(e.dav_child("other").is_none());
        assert_eq!(e.child_elems()[1].prop_name(), PropName::new("urn:x", "other"));
    }

    #[test]
    fn empty_and_broken_bodies() {
        assert!(parse_body(b"  \n").unwrap().is_none());
        assert!(parse_body(b"<D:prop").is_err());
    }
}
