use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use redix_core::Protocol;
use redix_driver::DriverOptions;

/// Build a connection URL for one node.
///
/// Bare `host:port` addresses get credentials, database, and protocol from
/// `options`. Addresses that already carry a scheme are used as given, with
/// only the protocol parameter added.
pub(crate) fn node_url(addr: &str, options: &DriverOptions, with_db: bool) -> String {
    let mut url = if addr.contains("://") {
        addr.to_owned()
    } else {
        let auth = match (&options.username, &options.password) {
            (Some(u), Some(p)) => format!(
                "{}:{}@",
                utf8_percent_encode(u, NON_ALPHANUMERIC),
                utf8_percent_encode(p, NON_ALPHANUMERIC)
            ),
            (None, Some(p)) => format!(":{}@", utf8_percent_encode(p, NON_ALPHANUMERIC)),
            (Some(u), None) => format!("{}@", utf8_percent_encode(u, NON_ALPHANUMERIC)),
            (None, None) => String::new(),
        };
        let db = if with_db && options.db != 0 {
            format!("/{}", options.db)
        } else {
            String::new()
        };
        format!("redis://{auth}{addr}{db}")
    };
    if options.protocol == Protocol::V3 {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str("protocol=resp3");
    }
    url
}

/// A URL for talking to a sentinel: no database, no client credentials.
pub(crate) fn sentinel_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_owned()
    } else {
        format!("redis://{addr}")
    }
}
