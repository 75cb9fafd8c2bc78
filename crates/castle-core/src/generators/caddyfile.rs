//! Gateway config generation (Caddy flavor).
//!
//! One site block on the gateway port: proxy routes for every locally
//! deployed component, then routes to peer nodes for paths this node does
//! not claim, then the static dashboard catch-all. Paths are sorted so
//! regeneration is deterministic.

use std::collections::BTreeSet;
use std::path::Path;

use crate::registry::NodeRegistry;

/// A proxy route advertised by a peer node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRoute {
    /// The peer's hostname (LAN-resolvable).
    pub hostname: String,
    /// Route path prefix.
    pub proxy_path: String,
    /// The peer-local port the route targets.
    pub port: u16,
}

/// Generate the gateway Caddyfile from the registry plus peer routes.
///
/// A local route always wins over a remote route on the same path; among
/// remote claims of one path, the first in `(path, hostname)` order wins.
#[must_use]
pub fn generate_caddyfile(
    registry: &NodeRegistry,
    remote_routes: &[RemoteRoute],
    static_app_dir: &Path,
    generated_dir: &Path,
) -> String {
    let mut lines = vec![format!(":{} {{", registry.node.gateway_port)];

    let mut local: Vec<(&str, u16)> = registry
        .deployed
        .values()
        .filter_map(|d| Some((d.proxy_path.as_deref()?, d.port?)))
        .collect();
    local.sort_unstable();

    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    for (path, port) in &local {
        claimed.insert(path);
        lines.push(format!("    handle_path {path}/* {{"));
        lines.push(format!("        reverse_proxy localhost:{port}"));
        lines.push("    }".to_owned());
        lines.push(String::new());
    }

    let mut remote: Vec<&RemoteRoute> = remote_routes.iter().collect();
    remote.sort_unstable_by(|a, b| {
        (a.proxy_path.as_str(), a.hostname.as_str()).cmp(&(b.proxy_path.as_str(), b.hostname.as_str()))
    });
    for route in remote {
        if !claimed.insert(&route.proxy_path) {
            continue;
        }
        lines.push(format!("    handle_path {}/* {{", route.proxy_path));
        lines.push(format!(
            "        reverse_proxy {}:{}",
            route.hostname, route.port
        ));
        lines.push("    }".to_owned());
        lines.push(String::new());
    }

    // Dashboard SPA when a built bundle exists; bare file server otherwise.
    if static_app_dir.join("index.html").is_file() {
        lines.push("    handle {".to_owned());
        lines.push(format!("        root * {}", static_app_dir.display()));
        lines.push("        try_files {path} /index.html".to_owned());
        lines.push("        file_server".to_owned());
        lines.push("    }".to_owned());
    } else {
        lines.push("    handle / {".to_owned());
        lines.push(format!("        root * {}", generated_dir.join("app").display()));
        lines.push("        file_server".to_owned());
        lines.push("    }".to_owned());
    }

    lines.push("}".to_owned());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::registry::{Behavior, DeployedComponent, NodeConfig, Runner};

    fn proxied(path: &str, port: u16) -> DeployedComponent {
        DeployedComponent {
            runner: Runner::Python,
            run_cmd: vec!["svc".into()],
            env: IndexMap::new(),
            description: None,
            behavior: Behavior::Daemon,
            stack: None,
            port: Some(port),
            health_path: None,
            proxy_path: Some(path.to_owned()),
            schedule: None,
            managed: true,
        }
    }

    fn registry(deployed: IndexMap<String, DeployedComponent>, port: u16) -> NodeRegistry {
        NodeRegistry {
            node: NodeConfig {
                hostname: "keep".into(),
                castle_root: None,
                gateway_port: port,
            },
            deployed,
        }
    }

    fn paths() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let static_app = dir.path().join("static").join("castle-app");
        let generated = dir.path().join("generated");
        (dir, static_app, generated)
    }

    #[test]
    fn test_gateway_port_and_route() {
        let (_d, static_app, generated) = paths();
        let mut deployed = IndexMap::new();
        deployed.insert("api".to_owned(), proxied("/api", 9001));

        let out = generate_caddyfile(&registry(deployed, 9000), &[], &static_app, &generated);
        assert!(out.starts_with(":9000 {"));
        assert!(out.contains("handle_path /api/* {"));
        assert!(out.contains("reverse_proxy localhost:9001"));
    }

    #[test]
    fn test_non_proxied_components_skipped() {
        let (_d, static_app, generated) = paths();
        let mut deployed = IndexMap::new();
        let mut tool = proxied("/x", 1);
        tool.proxy_path = None;
        tool.port = None;
        deployed.insert("tool".to_owned(), tool);

        let out = generate_caddyfile(&registry(deployed, 9000), &[], &static_app, &generated);
        assert!(!out.contains("handle_path"));
    }

    #[test]
    fn test_routes_sorted_by_path() {
        let (_d, static_app, generated) = paths();
        let mut deployed = IndexMap::new();
        deployed.insert("z".to_owned(), proxied("/zulu", 9002));
        deployed.insert("a".to_owned(), proxied("/alpha", 9001));

        let out = generate_caddyfile(&registry(deployed, 9000), &[], &static_app, &generated);
        let alpha = out.find("/alpha").unwrap();
        let zulu = out.find("/zulu").unwrap();
        assert!(alpha < zulu);
    }

    #[test]
    fn test_local_claims_beat_remote() {
        let (_d, static_app, generated) = paths();
        let mut deployed = IndexMap::new();
        deployed.insert("svc".to_owned(), proxied("/svc", 9001));

        let remote = vec![RemoteRoute {
            hostname: "other".into(),
            proxy_path: "/svc".into(),
            port: 9010,
        }];
        let out = generate_caddyfile(&registry(deployed, 9000), &remote, &static_app, &generated);

        assert_eq!(out.matches("handle_path /svc/* {").count(), 1);
        assert!(out.contains("reverse_proxy localhost:9001"));
        assert!(!out.contains("other:9010"));
    }

    #[test]
    fn test_unclaimed_remote_route_emitted() {
        let (_d, static_app, generated) = paths();
        let remote = vec![RemoteRoute {
            hostname: "den".into(),
            proxy_path: "/media".into(),
            port: 9010,
        }];
        let out = generate_caddyfile(
            &registry(IndexMap::new(), 9000),
            &remote,
            &static_app,
            &generated,
        );
        assert!(out.contains("handle_path /media/* {"));
        assert!(out.contains("reverse_proxy den:9010"));
    }

    #[test]
    fn test_duplicate_remote_claims_first_host_wins() {
        let (_d, static_app, generated) = paths();
        let remote = vec![
            RemoteRoute {
                hostname: "zeta".into(),
                proxy_path: "/media".into(),
                port: 9012,
            },
            RemoteRoute {
                hostname: "alpha".into(),
                proxy_path: "/media".into(),
                port: 9011,
            },
        ];
        let out = generate_caddyfile(
            &registry(IndexMap::new(), 9000),
            &remote,
            &static_app,
            &generated,
        );
        assert_eq!(out.matches("handle_path /media/* {").count(), 1);
        assert!(out.contains("alpha:9011"));
    }

    #[test]
    fn test_spa_handler_when_bundle_exists() {
        let (_d, static_app, generated) = paths();
        std::fs::create_dir_all(&static_app).unwrap();
        std::fs::write(static_app.join("index.html"), "<html></html>").unwrap();

        let out = generate_caddyfile(&registry(IndexMap::new(), 9000), &[], &static_app, &generated);
        assert!(out.contains("try_files {path} /index.html"));
        assert!(out.contains("file_server"));
    }

    #[test]
    fn test_fallback_handler_without_bundle() {
        let (_d, static_app, generated) = paths();
        let out = generate_caddyfile(&registry(IndexMap::new(), 9000), &[], &static_app, &generated);
        assert!(out.contains("handle / {"));
        assert!(out.contains("file_server"));
        assert!(!out.contains("try_files"));
    }

    #[test]
    fn test_proxy_routes_precede_static_handler() {
        let (_d, static_app, generated) = paths();
        let mut deployed = IndexMap::new();
        deployed.insert("api".to_owned(), proxied("/api", 9001));
        let out = generate_caddyfile(&registry(deployed, 9000), &[], &static_app, &generated);
        assert!(out.find("handle_path").unwrap() < out.find("handle /").unwrap());
    }
}
