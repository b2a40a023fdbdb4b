/// The per-router control endpoint. Never announced upstream.
pub const CONTROL_ROUTE: &str = "$control";

/// The root router's control endpoint. Only resolvable at the root.
pub const CONTROL_ROOT_ROUTE: &str = "$control:root";

/// Default destination for a fresh request whose `route` field is empty.
pub const DEFAULT_ROUTE: &str = "wavesrv";

/// A route name is a control route (never forwarded upstream by
/// `routeAnnounce`).
pub fn is_control_route(route: &str) -> bool {
    route == CONTROL_ROUTE || route == CONTROL_ROOT_ROUTE
}

pub fn conn_route(id: &str) -> String {
    format!("conn:{id}")
}

pub fn controller_route(block_id: &str) -> String {
    format!("controller:{block_id}")
}

pub fn proc_route(id: &str) -> String {
    format!("proc:{id}")
}

pub fn tab_route(id: &str) -> String {
    format!("tab:{id}")
}

pub fn feblock_route(block_id: &str) -> String {
    format!("feblock:{block_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_routes_are_recognized() {
        assert!(is_control_route(CONTROL_ROUTE));
        assert!(is_control_route(CONTROL_ROOT_ROUTE));
        assert!(!is_control_route("conn:abc"));
    }

    #[test]
    fn route_helpers_format_as_documented() {
        assert_eq!(conn_route("abc"), "conn:abc");
        assert_eq!(controller_route("b1"), "controller:b1");
        assert_eq!(tab_route("t1"), "tab:t1");
    }
}
