//! Remote call model shared by the sync layer and transports.

mod call;
mod response;
mod transport;

pub use call::*;
pub use response::{parse_property_map, ProfileResult, RpcResponse};
pub(crate) use response::string_values;
pub use transport::Transport;

/// Endpoint URL for a host and optional domain group.
pub fn endpoint_url(host_name: &str, domain_group: Option<&str>) -> String {
    let domain_group = domain_group
        .filter(|group| !group.is_empty())
        .unwrap_or("DEFAULT");
    format!("{}/DG/{}/rest/rpc/?", host_name, domain_group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_domain_group() {
        assert_eq!(
            endpoint_url("https://host.example", None),
            "https://host.example/DG/DEFAULT/rest/rpc/?"
        );
        assert_eq!(
            endpoint_url("https://host.example", Some("")),
            "https://host.example/DG/DEFAULT/rest/rpc/?"
        );
        assert_eq!(
            endpoint_url("https://host.example", Some("abc")),
            "https://host.example/DG/abc/rest/rpc/?"
        );
    }
}
