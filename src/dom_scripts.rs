//! Page-side helper script embedding.
//!
//! The helpers live in their own `.js` file so editors can highlight them;
//! they are bundled as a string at compile time and injected into every page
//! the chromiumoxide source attaches to.

/// Embedded contents of `scripts/dom_snapshot.js`.
pub const SIDEBAR_DOM_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/dom_snapshot.js"
));

/// Global object the script installs on `window`.
pub const SIDEBAR_GLOBAL: &str = "window.__codeSidebar";

pub fn sidebar_dom_script() -> &'static str {
    SIDEBAR_DOM_SCRIPT
}

/// Expression returning the serialised document as a JSON string.
pub fn snapshot_expression() -> String {
    format!("{SIDEBAR_GLOBAL}.snapshot()")
}

/// Expression attaching the mutation observer to the element with snapshot
/// id `node`, or to the body when `None`.
pub fn observe_expression(node: Option<u64>) -> String {
    match node {
        Some(id) => format!("{SIDEBAR_GLOBAL}.observe({id})"),
        None => format!("{SIDEBAR_GLOBAL}.observe(null)"),
    }
}

pub fn mutation_count_expression() -> String {
    format!("{SIDEBAR_GLOBAL}.mutationCount()")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_script_is_non_empty() {
        assert!(!SIDEBAR_DOM_SCRIPT.trim().is_empty());
    }

    #[test]
    fn embedded_script_defines_every_helper_we_call() {
        assert!(SIDEBAR_DOM_SCRIPT.contains("window.__codeSidebar ="));
        for helper in ["snapshot()", "observe(id)", "mutationCount()"] {
            assert!(
                SIDEBAR_DOM_SCRIPT.contains(helper),
                "dom script should define {helper}"
            );
        }
    }

    #[test]
    fn embedded_script_emits_the_flat_format() {
        assert!(SIDEBAR_DOM_SCRIPT.contains("return { nodes };"));
        assert!(SIDEBAR_DOM_SCRIPT.contains("entry.parent = parent;"));
    }

    #[test]
    fn expressions_target_the_global() {
        assert_eq!(snapshot_expression(), "window.__codeSidebar.snapshot()");
        assert_eq!(observe_expression(Some(12)), "window.__codeSidebar.observe(12)");
        assert_eq!(observe_expression(None), "window.__codeSidebar.observe(null)");
        assert_eq!(
            mutation_count_expression(),
            "window.__codeSidebar.mutationCount()"
        );
    }
}
