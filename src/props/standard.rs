//! The standard property sources: live DAV: properties computed from the
//! resource, and dead properties stored on it.
use crate::errors::DavError;
use crate::props::{PropName, PropType, PropValue, PropertyMetaData, PropertySource};
use crate::resource::{Caps, DavResource};
use crate::DavResult;

const LIVE_PROPS: [(&str, PropType); 9] = [
    ("creationdate", PropType::Date),
    ("displayname", PropType::Text),
    ("getcontentlength", PropType::Long),
    ("getcontenttype", PropType::Text),
    ("getetag", PropType::Text),
    ("getlastmodified", PropType::HttpDate),
    ("resourcetype", PropType::ResourceType),
    ("lockdiscovery", PropType::LockDiscovery),
    ("supportedlock", PropType::SupportedLock),
];

/// Live properties of the DAV: namespace. All read-only.
#[derive(Debug, Default, Clone)]
pub struct DavPropertySource;

impl DavPropertySource {
    fn applies(name: &str, res: &dyn DavResource) -> bool {
        let caps = res.caps();
        let is_coll = caps.contains(Caps::COLLECTION);
        match name {
            "creationdate" => res.created().is_some(),
            "getlastmodified" => res.modified().is_some(),
            "getcontentlength" => !is_coll && res.content_length().is_some(),
            "getcontenttype" => !is_coll,
            "getetag" => res.etag().is_some(),
            "lockdiscovery" | "supportedlock" => caps.contains(Caps::LOCKABLE),
            "displayname" | "resourcetype" => true,
            _ => false,
        }
    }
}

impl PropertySource for DavPropertySource {
    fn metadata(&self, name: &PropName, res: &dyn DavResource) -> PropertyMetaData {
        if !name.is_dav() || !Self::applies(&name.name, res) {
            return PropertyMetaData::Unknown;
        }
        LIVE_PROPS
            .iter()
            .find(|(n, _)| *n == name.name)
            .map(|(_, t)| PropertyMetaData::read_only(*t))
            .unwrap_or(PropertyMetaData::Unknown)
    }

    fn get_value(&self, name: &PropName, res: &dyn DavResource) -> DavResult<Option<PropValue>> {
        if !name.is_dav() {
            return Ok(None);
        }
        let v = match name.name.as_str() {
            "creationdate" => res.created().map(PropValue::Date),
            "displayname" => Some(PropValue::Text(res.name())),
            "getcontentlength" => res.content_length().map(PropValue::Long),
            "getcontenttype" => Some(
                res.content_type()
                    .map(PropValue::Text)
                    .unwrap_or(PropValue::Empty),
            ),
            "getetag" => res.etag().map(PropValue::Text),
            "getlastmodified" => res.modified().map(PropValue::HttpDate),
            "resourcetype" => {
                let mut types = Vec::new();
                if res.caps().contains(Caps::COLLECTION) {
                    types.push(PropName::dav("collection"));
                }
                Some(PropValue::ResourceType(types))
            }
            "lockdiscovery" => Some(PropValue::LockDiscovery(res.current_lock())),
            "supportedlock" => Some(PropValue::SupportedLock),
            _ => None,
        };
        Ok(v)
    }

    fn set_value(
        &self,
        name: &PropName,
        _res: &dyn DavResource,
        _value: Option<PropValue>,
    ) -> DavResult<()> {
        Err(DavError::Conflict(format!("{name} is read-only")))
    }

    fn all_names(&self, res: &dyn DavResource) -> Vec<PropName> {
        LIVE_PROPS
            .iter()
            .filter(|(n, _)| Self::applies(n, res))
            .map(|(n, _)| PropName::dav(n))
            .collect()
    }
}

/// Arbitrary properties outside the DAV: namespace, for resources with
/// the `CUSTOM_PROPS` capability.
#[derive(Debug, Default, Clone)]
pub struct DeadPropertySource;

impl PropertySource for DeadPropertySource {
    fn metadata(&self, name: &PropName, res: &dyn DavResource) -> PropertyMetaData {
        if name.is_dav() || !res.caps().contains(Caps::CUSTOM_PROPS) {
            return PropertyMetaData::Unknown;
        }
        PropertyMetaData::writable(PropType::Xml)
    }

    fn get_value(&self, name: &PropName, res: &dyn DavResource) -> DavResult<Option<PropValue>> {
        Ok(res
            .dead_props()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| PropValue::Xml(e)))
    }

    fn set_value(
        &self,
        name: &PropName,
        res: &dyn DavResource,
        value: Option<PropValue>,
    ) -> DavResult<()> {
        match value {
            None => res.set_dead_prop(name, None),
            Some(PropValue::Xml(e)) => res.set_dead_prop(name, Some(e)),
            Some(_) => Err(DavError::Conflict(format!("{name} takes XML content"))),
        }
    }

    fn all_names(&self, res: &dyn DavResource) -> Vec<PropName> {
        if !res.caps().contains(Caps::CUSTOM_PROPS) {
            return Vec::new();
        }
        res.dead_props().into_iter().map(|(n, _)| n).collect()
    }
}
