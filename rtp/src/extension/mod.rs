pub mod ntp_time_extension;
pub mod subflow_extension;

use std::collections::HashMap;

/// 64-bit wall-clock synchronization element (8 octets).
pub const EXTENSION_URI_NTP_64: &str = "urn:ietf:params:rtp-hdrext:ntp-64";
/// 56-bit wall-clock synchronization element (7 octets). Recognized but not
/// interpreted; packets carrying it are counted as wire-format discards.
pub const EXTENSION_URI_NTP_56: &str = "urn:ietf:params:rtp-hdrext:ntp-56";
/// Multipath subflow tag: subflow id plus subflow-specific sequence number.
pub const EXTENSION_URI_SUBFLOW: &str = "urn:ietf:params:rtp-hdrext:mprtp";
/// Control packet carried inside a media-packet header extension, opaque.
pub const EXTENSION_URI_CONTROL: &str = "urn:ietf:params:rtp-hdrext:rtcp";

/// ExtensionMap resolves negotiated header-extension URIs to the small
/// integer ids used on the wire. The mapping itself is produced by the
/// session-description layer and only consumed here.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtensionMap {
    by_uri: HashMap<String, u8>,
}

impl ExtensionMap {
    pub fn new() -> Self {
        ExtensionMap::default()
    }

    pub fn insert(&mut self, uri: &str, id: u8) {
        self.by_uri.insert(uri.to_owned(), id);
    }

    pub fn id(&self, uri: &str) -> Option<u8> {
        self.by_uri.get(uri).copied()
    }

    pub fn uri(&self, id: u8) -> Option<&str> {
        self.by_uri
            .iter()
            .find(|(_, &v)| v == id)
            .map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_extension_map_lookup_both_ways() {
        let mut map = ExtensionMap::new();
        map.insert(EXTENSION_URI_NTP_64, 1);
        map.insert(EXTENSION_URI_SUBFLOW, 2);

        assert_eq!(map.id(EXTENSION_URI_NTP_64), Some(1));
        assert_eq!(map.id(EXTENSION_URI_SUBFLOW), Some(2));
        assert_eq!(map.id(EXTENSION_URI_NTP_56), None);
        assert_eq!(map.uri(2), Some(EXTENSION_URI_SUBFLOW));
        assert_eq!(map.uri(9), None);
    }
}
