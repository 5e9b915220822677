//! Multistatus and lockdiscovery XML bodies.

use crate::lock::{Lock, LockDepth, LockScope};
use davit_vfs::Entry;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use quick_xml::se::to_string as to_xml;
use serde::Serialize;

/// Characters escaped inside href path segments. Slashes stay literal.
const HREF_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'#')
    .add(b'?')
    .add(b'%')
    .add(b'&')
    .add(b'+');

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

fn href_for(prefix: &str, path: &str) -> String {
    format!(
        "{}{}",
        prefix.trim_end_matches('/'),
        utf8_percent_encode(path, HREF_ENCODE)
    )
}

fn http_date(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Serialize)]
#[serde(rename = "D:multistatus")]
struct Multistatus {
    #[serde(rename = "@xmlns:D")]
    xmlns: &'static str,
    #[serde(rename = "D:response")]
    responses: Vec<DavResponse>,
}

#[derive(Serialize)]
struct DavResponse {
    #[serde(rename = "D:href")]
    href: String,
    #[serde(rename = "D:propstat")]
    propstat: Propstat,
}

#[derive(Serialize)]
struct Propstat {
    #[serde(rename = "D:prop")]
    prop: Prop,
    #[serde(rename = "D:status")]
    status: String,
}

#[derive(Serialize)]
struct Prop {
    #[serde(rename = "D:displayname")]
    displayname: String,
    #[serde(rename = "D:resourcetype")]
    resourcetype: ResourceType,
    #[serde(rename = "D:getcontentlength", skip_serializing_if = "Option::is_none")]
    getcontentlength: Option<u64>,
    #[serde(rename = "D:getlastmodified", skip_serializing_if = "Option::is_none")]
    getlastmodified: Option<String>,
    #[serde(rename = "D:getetag", skip_serializing_if = "Option::is_none")]
    getetag: Option<String>,
    #[serde(rename = "D:getcontenttype", skip_serializing_if = "Option::is_none")]
    getcontenttype: Option<String>,
}

#[derive(Serialize)]
struct ResourceType {
    #[serde(rename = "D:collection", skip_serializing_if = "Option::is_none")]
    collection: Option<Collection>,
}

#[derive(Serialize)]
struct Collection;

fn response_for(prefix: &str, entry: &Entry) -> DavResponse {
    let prop = if entry.is_directory {
        Prop {
            displayname: entry.name.clone(),
            resourcetype: ResourceType {
                collection: Some(Collection),
            },
            getcontentlength: None,
            getlastmodified: entry.modified.as_ref().map(http_date),
            getetag: None,
            getcontenttype: None,
        }
    } else {
        Prop {
            displayname: entry.name.clone(),
            resourcetype: ResourceType { collection: None },
            getcontentlength: Some(entry.size),
            getlastmodified: entry.modified.as_ref().map(http_date),
            getetag: entry.etag.clone(),
            getcontenttype: Some(entry.mimetype.clone()),
        }
    };
    DavResponse {
        href: href_for(prefix, entry.path.as_str()),
        propstat: Propstat {
            prop,
            status: "HTTP/1.1 200 OK".to_string(),
        },
    }
}

/// The PROPFIND multistatus body: the resource itself first, then its
/// children for depth 1.
pub fn multistatus(prefix: &str, self_entry: &Entry, children: &[Entry]) -> String {
    let mut responses = vec![response_for(prefix, self_entry)];
    responses.extend(children.iter().map(|entry| response_for(prefix, entry)));
    let body = Multistatus {
        xmlns: "DAV:",
        responses,
    };
    format!("{XML_HEADER}{}", to_xml(&body).unwrap_or_default())
}

/// A PROPPATCH reply refusing to change live properties.
pub fn proppatch_refusal(prefix: &str, path: &str, prop_names: &[String]) -> String {
    #[derive(Serialize)]
    #[serde(rename = "D:multistatus")]
    struct PatchStatus {
        #[serde(rename = "@xmlns:D")]
        xmlns: &'static str,
        #[serde(rename = "D:response")]
        response: PatchResponse,
    }
    #[derive(Serialize)]
    struct PatchResponse {
        #[serde(rename = "D:href")]
        href: String,
        #[serde(rename = "D:propstat")]
        propstat: Vec<Propstat>,
    }
    let propstat = prop_names
        .iter()
        .map(|name| Propstat {
            prop: Prop {
                displayname: name.clone(),
                resourcetype: ResourceType { collection: None },
                getcontentlength: None,
                getlastmodified: None,
                getetag: None,
                getcontenttype: None,
            },
            status: "HTTP/1.1 403 Forbidden".to_string(),
        })
        .collect();
    let body = PatchStatus {
        xmlns: "DAV:",
        response: PatchResponse {
            href: href_for(prefix, path),
            propstat,
        },
    };
    format!("{XML_HEADER}{}", to_xml(&body).unwrap_or_default())
}

// Lockdiscovery

#[derive(Serialize)]
#[serde(rename = "D:prop")]
struct LockProp {
    #[serde(rename = "@xmlns:D")]
    xmlns: &'static str,
    #[serde(rename = "D:lockdiscovery")]
    lockdiscovery: LockDiscovery,
}

#[derive(Serialize)]
struct LockDiscovery {
    #[serde(rename = "D:activelock")]
    activelock: ActiveLock,
}

#[derive(Serialize)]
struct ActiveLock {
    #[serde(rename = "D:locktype")]
    locktype: LockType,
    #[serde(rename = "D:lockscope")]
    lockscope: LockScopeXml,
    #[serde(rename = "D:depth")]
    depth: String,
    #[serde(rename = "D:owner", skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(rename = "D:timeout")]
    timeout: String,
    #[serde(rename = "D:locktoken")]
    locktoken: Href,
    #[serde(rename = "D:lockroot")]
    lockroot: Href,
}

#[derive(Serialize)]
struct LockType {
    #[serde(rename = "D:write")]
    write: Collection,
}

#[derive(Serialize)]
struct LockScopeXml {
    #[serde(rename = "D:exclusive", skip_serializing_if = "Option::is_none")]
    exclusive: Option<Collection>,
    #[serde(rename = "D:shared", skip_serializing_if = "Option::is_none")]
    shared: Option<Collection>,
}

#[derive(Serialize)]
struct Href {
    #[serde(rename = "D:href")]
    href: String,
}

/// The LOCK response body for a granted or refreshed lock.
pub fn lockdiscovery(prefix: &str, lock: &Lock) -> String {
    let body = LockProp {
        xmlns: "DAV:",
        lockdiscovery: LockDiscovery {
            activelock: ActiveLock {
                locktype: LockType { write: Collection },
                lockscope: match lock.scope {
                    LockScope::Exclusive => LockScopeXml {
                        exclusive: Some(Collection),
                        shared: None,
                    },
                    LockScope::Shared => LockScopeXml {
                        exclusive: None,
                        shared: Some(Collection),
                    },
                },
                depth: match lock.depth {
                    LockDepth::Zero => "0".to_string(),
                    LockDepth::Infinity => "infinity".to_string(),
                },
                owner: lock.owner.clone(),
                timeout: format!("Second-{}", lock.timeout_secs),
                locktoken: Href {
                    href: lock.token.clone(),
                },
                lockroot: Href {
                    href: href_for(prefix, &lock.path),
                },
            },
        },
    };
    format!("{XML_HEADER}{}", to_xml(&body).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use davit_common::VirtualPath;

    fn dir_entry(name: &str, path: &str) -> Entry {
        Entry::directory(name, VirtualPath::parse(path).unwrap(), None)
    }

    fn file_entry(name: &str, path: &str, size: u64) -> Entry {
        Entry {
            name: name.to_string(),
            path: VirtualPath::parse(path).unwrap(),
            is_directory: false,
            size,
            modified: chrono::DateTime::from_timestamp(1_700_000_000, 0),
            mimetype: "text/plain".to_string(),
            etag: Some("\"abc\"".to_string()),
            preview_url: None,
            download_url: None,
        }
    }

    #[test]
    fn test_multistatus_shape() {
        let xml = multistatus(
            "/dav",
            &dir_entry("docs", "/docs/"),
            &[file_entry("a.txt", "/docs/a.txt", 5), dir_entry("sub", "/docs/sub/")],
        );
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<D:multistatus xmlns:D=\"DAV:\">"));
        assert!(xml.contains("<D:href>/dav/docs/</D:href>"));
        assert!(xml.contains("<D:href>/dav/docs/a.txt</D:href>"));
        // Directories carry <collection/>, files an empty resourcetype
        assert!(xml.contains("<D:collection/>"));
        assert!(xml.contains("<D:getcontentlength>5</D:getcontentlength>"));
        assert!(xml.contains("<D:getcontenttype>text/plain</D:getcontenttype>"));
        assert!(xml.contains("HTTP/1.1 200 OK"));
    }

    #[test]
    fn test_href_escaping() {
        let xml = multistatus(
            "/dav",
            &dir_entry("docs", "/docs/"),
            &[file_entry("a b.txt", "/docs/a b.txt", 1)],
        );
        assert!(xml.contains("/dav/docs/a%20b.txt"));
    }

    #[test]
    fn test_lockdiscovery_shape() {
        let lock = Lock {
            token: "opaquelocktoken:deadbeef".to_string(),
            path: "/x.txt".to_string(),
            depth: LockDepth::Zero,
            scope: LockScope::Exclusive,
            owner: Some("alice".to_string()),
            timeout_secs: 600,
            expires_at: std::time::Instant::now(),
        };
        let xml = lockdiscovery("/dav", &lock);
        assert!(xml.contains("<D:exclusive/>"));
        assert!(xml.contains("<D:depth>0</D:depth>"));
        assert!(xml.contains("<D:timeout>Second-600</D:timeout>"));
        assert!(xml.contains("<D:href>opaquelocktoken:deadbeef</D:href>"));
        assert!(xml.contains("<D:href>/dav/x.txt</D:href>"));
    }

    #[test]
    fn test_proppatch_refusal() {
        let xml = proppatch_refusal("/dav", "/x.txt", &["Win32CreationTime".to_string()]);
        assert!(xml.contains("HTTP/1.1 403 Forbidden"));
        assert!(xml.contains("/dav/x.txt"));
    }
}
