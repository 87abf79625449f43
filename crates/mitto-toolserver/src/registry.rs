// SPDX-License-Identifier: Apache-2.0
//! Builds the [`ToolRegistry`] of meta-tools exposed by this process,
//! optionally restricted to a named subset.

use std::sync::Arc;

use mitto_tools::ToolRegistry;

use crate::context::ToolContext;
use crate::tools::{
    ArchiveTool, ConversationStartTool, GetConfigTool, GetConversationSummaryTool,
    GetConversationTool, GetCurrentSessionTool, GetRuntimeInfoTool, ListConversationsTool,
    SendPromptToConversationTool, SetPeriodicTool, UiAskYesNoTool, UiOptionsButtonsTool,
    UiOptionsComboTool, META_TOOL_NAMES,
};

/// Same names as [`META_TOOL_NAMES`], re-exported at this module's root for
/// callers that only need the list (e.g. `mitto show-config`).
pub const DEFAULT_TOOL_NAMES: &[&str] = META_TOOL_NAMES;

/// Build the registry of meta-tools backed by `ctx`.
///
/// `allowed_names` is a comma-separated allow-list (matching the `--tools`
/// CLI convention); `None` or the literal `"all"` registers every tool. Any
/// name not in [`META_TOOL_NAMES`] is silently ignored.
pub fn build_tool_registry(ctx: Arc<ToolContext>, allowed_names: Option<&str>) -> ToolRegistry {
    let filter: Option<std::collections::HashSet<&str>> = match allowed_names {
        None => None,
        Some(list) if list.trim().eq_ignore_ascii_case("all") => None,
        Some(list) => Some(list.split(',').map(|s| s.trim()).collect()),
    };

    let allow = |name: &str| -> bool {
        match &filter {
            None => true,
            Some(set) => set.contains(name),
        }
    };

    let mut reg = ToolRegistry::new();
    if allow("list_conversations") {
        reg.register(ListConversationsTool(ctx.clone()));
    }
    if allow("get_runtime_info") {
        reg.register(GetRuntimeInfoTool(ctx.clone()));
    }
    if allow("get_config") {
        reg.register(GetConfigTool(ctx.clone()));
    }
    if allow("get_current_session") {
        reg.register(GetCurrentSessionTool(ctx.clone()));
    }
    if allow("get_conversation") {
        reg.register(GetConversationTool(ctx.clone()));
    }
    if allow("get_conversation_summary") {
        reg.register(GetConversationSummaryTool(ctx.clone()));
    }
    if allow("send_prompt_to_conversation") {
        reg.register(SendPromptToConversationTool(ctx.clone()));
    }
    if allow("ui_ask_yes_no") {
        reg.register(UiAskYesNoTool(ctx.clone()));
    }
    if allow("ui_options_buttons") {
        reg.register(UiOptionsButtonsTool(ctx.clone()));
    }
    if allow("ui_options_combo") {
        reg.register(UiOptionsComboTool(ctx.clone()));
    }
    if allow("conversation_start") {
        reg.register(ConversationStartTool(ctx.clone()));
    }
    if allow("set_periodic") {
        reg.register(SetPeriodicTool(ctx.clone()));
    }
    if allow("archive") {
        reg.register(ArchiveTool(ctx.clone()));
    }
    reg
}


#[cfg(test)]
mod tests {
    use super::*;
    use tests_support::test_ctx;

    #[test]
    fn default_registry_contains_all_meta_tools() {
        let reg = build_tool_registry(test_ctx(), None);
        let names = reg.names();
        for expected in META_TOOL_NAMES {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn all_keyword_includes_all_meta_tools() {
        let reg = build_tool_registry(test_ctx(), Some("all"));
        assert_eq!(reg.names().len(), META_TOOL_NAMES.len());
    }

    #[test]
    fn allowed_names_filter_restricts_tools() {
        let reg = build_tool_registry(test_ctx(), Some("get_config,list_conversations"));
        let mut names = reg.names();
        names.sort();
        assert_eq!(names, vec!["get_config", "list_conversations"]);
    }

    #[test]
    fn single_tool_allowed() {
        let reg = build_tool_registry(test_ctx(), Some("archive"));
        assert_eq!(reg.names(), vec!["archive".to_string()]);
    }

    #[test]
    fn unknown_tool_name_in_filter_is_ignored() {
        let reg = build_tool_registry(test_ctx(), Some("not_a_real_tool"));
        assert!(reg.names().is_empty());
    }

    #[test]
    fn whitespace_around_tool_names_is_trimmed() {
        let reg = build_tool_registry(test_ctx(), Some(" get_config , archive "));
        let mut names = reg.names();
        names.sort();
        assert_eq!(names, vec!["archive", "get_config"]);
    }

    #[test]
    fn meta_tool_names_constant_matches_registered_count() {
        let reg = build_tool_registry(test_ctx(), None);
        assert_eq!(reg.names().len(), META_TOOL_NAMES.len());
    }
}
