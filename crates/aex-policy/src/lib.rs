//! Pure policy decision function.
//!
//! `decide` maps `(permission_mode, tool_name, tool_permission?, overrides?)`
//! to an allow/deny/ask decision using a strict seven-step priority order.
//! The function is stateless and deterministic: equal inputs always produce
//! an equal [`PolicySnapshot`] (byte-for-byte after canonicalization).

use aex_core::{DecisionKind, PermissionMode, PolicyEvaluation, PolicyOverrides, PolicySnapshot, PolicySource, ToolPermission};

/// Evaluate policy for one tool call and return the resulting snapshot.
///
/// The snapshot's `sources` holds exactly one [`PolicyEvaluation`] tagged
/// `source: codesdk` — the automated evaluation. Callers that resolve an
/// `ask` decision through a human RPC are expected to append a second
/// evaluation tagged `source: user` to the same trail (see
/// [`PolicyAuditor::resolve_ask`]).
#[must_use]
pub fn decide(
    mode: PermissionMode,
    tool_name: &str,
    tool_permission: Option<ToolPermission>,
    overrides: &PolicyOverrides,
) -> PolicySnapshot {
    let (decision, rule) = decide_raw(mode, tool_name, tool_permission, overrides);
    PolicySnapshot {
        permission_mode: mode,
        decision,
        sources: vec![PolicyEvaluation {
            source: PolicySource::Codesdk,
            result: decision,
            rule: rule.to_string(),
        }],
    }
}

fn decide_raw(
    mode: PermissionMode,
    tool_name: &str,
    tool_permission: Option<ToolPermission>,
    overrides: &PolicyOverrides,
) -> (DecisionKind, &'static str) {
    // 1. Explicit tool deny.
    if contains(&overrides.deny_tools, tool_name) {
        return (DecisionKind::Deny, "override:deny_tool");
    }
    // 2. Permission-class deny.
    if let Some(perm) = tool_permission {
        if contains_perm(&overrides.deny_permissions, perm) {
            return (DecisionKind::Deny, "override:deny_permission");
        }
    }
    // 3. Explicit tool allow.
    if contains(&overrides.allow_tools, tool_name) {
        return (DecisionKind::Allow, "override:allow_tool");
    }
    // 4. Permission-class allow.
    if let Some(perm) = tool_permission {
        if contains_perm(&overrides.allow_permissions, perm) {
            return (DecisionKind::Allow, "override:allow_permission");
        }
    }
    // 5. Dangerous tools are denied outside yolo mode.
    if tool_permission == Some(ToolPermission::Dangerous) && mode != PermissionMode::Yolo {
        return (DecisionKind::Deny, "permission_mode:dangerous");
    }
    // 6. auto/yolo allow everything else.
    match mode {
        PermissionMode::Auto => (DecisionKind::Allow, "permission_mode:auto"),
        PermissionMode::Yolo => (DecisionKind::Allow, "permission_mode:yolo"),
        // 7. Otherwise ask.
        PermissionMode::Ask => (DecisionKind::Ask, "permission_mode:ask"),
    }
}

fn contains(list: &Option<Vec<String>>, name: &str) -> bool {
    list.as_ref().is_some_and(|v| v.iter().any(|t| t == name))
}

fn contains_perm(list: &Option<Vec<ToolPermission>>, perm: ToolPermission) -> bool {
    list.as_ref().is_some_and(|v| v.contains(&perm))
}

/// Records every decision made through it, building the audit trail used for
/// diagnostics and the `/sessions/{id}/support-bundle` export. Does not
/// itself decide anything; wraps calls to the pure [`decide`] function.
#[derive(Debug, Default)]
pub struct PolicyAuditor {
    log: Vec<PolicySnapshot>,
}

impl PolicyAuditor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        mode: PermissionMode,
        tool_name: &str,
        tool_permission: Option<ToolPermission>,
        overrides: &PolicyOverrides,
    ) -> PolicySnapshot {
        let snapshot = decide(mode, tool_name, tool_permission, overrides);
        self.log.push(snapshot.clone());
        snapshot
    }

    /// Append a user-sourced resolution to an existing `ask` snapshot,
    /// producing the final snapshot recorded on `tool.call.denied` /
    /// `tool.call.completed`.
    #[must_use]
    pub fn resolve_ask(mut snapshot: PolicySnapshot, approved: bool) -> PolicySnapshot {
        let result = if approved { DecisionKind::Allow } else { DecisionKind::Deny };
        snapshot.sources.push(PolicyEvaluation {
            source: PolicySource::User,
            result,
            rule: "user:decision".to_string(),
        });
        snapshot.decision = result;
        snapshot
    }

    #[must_use]
    pub fn entries(&self) -> &[PolicySnapshot] {
        &self.log
    }

    #[must_use]
    pub fn denied_count(&self) -> usize {
        self.log.iter().filter(|s| s.decision == DecisionKind::Deny).count()
    }

    #[must_use]
    pub fn allowed_count(&self) -> usize {
        self.log.iter().filter(|s| s.decision == DecisionKind::Allow).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides() -> PolicyOverrides {
        PolicyOverrides::default()
    }

    #[test]
    fn auto_mode_allows_by_default() {
        let snap = decide(PermissionMode::Auto, "workspace.read", None, &overrides());
        assert_eq!(snap.decision, DecisionKind::Allow);
        assert_eq!(snap.sources[0].rule, "permission_mode:auto");
    }

    #[test]
    fn ask_mode_asks_by_default() {
        let snap = decide(PermissionMode::Ask, "workspace.read", None, &overrides());
        assert_eq!(snap.decision, DecisionKind::Ask);
    }

    #[test]
    fn dangerous_tool_denied_outside_yolo() {
        let snap = decide(PermissionMode::Auto, "shell.exec", Some(ToolPermission::Dangerous), &overrides());
        assert_eq!(snap.decision, DecisionKind::Deny);
        assert_eq!(snap.sources[0].rule, "permission_mode:dangerous");
    }

    #[test]
    fn dangerous_tool_allowed_in_yolo() {
        let snap = decide(PermissionMode::Yolo, "shell.exec", Some(ToolPermission::Dangerous), &overrides());
        assert_eq!(snap.decision, DecisionKind::Allow);
        assert_eq!(snap.sources[0].rule, "permission_mode:yolo");
    }

    #[test]
    fn explicit_tool_deny_beats_everything() {
        let mut ov = overrides();
        ov.deny_tools = Some(vec!["shell.exec".into()]);
        let snap = decide(PermissionMode::Yolo, "shell.exec", None, &ov);
        assert_eq!(snap.decision, DecisionKind::Deny);
        assert_eq!(snap.sources[0].rule, "override:deny_tool");
    }

    #[test]
    fn explicit_tool_allow_beats_dangerous_denial() {
        let mut ov = overrides();
        ov.allow_tools = Some(vec!["shell.exec".into()]);
        let snap = decide(PermissionMode::Auto, "shell.exec", Some(ToolPermission::Dangerous), &ov);
        assert_eq!(snap.decision, DecisionKind::Allow);
        assert_eq!(snap.sources[0].rule, "override:allow_tool");
    }

    #[test]
    fn permission_class_deny_beats_tool_allow_list_order() {
        // Step 2 (permission-class deny) must fire before step 3 (tool allow)
        // even if the tool is separately on the allow list, since deny_tools
        // (step 1) didn't match and permission deny is checked next.
        let mut ov = overrides();
        ov.allow_tools = Some(vec!["net.fetch".into()]);
        ov.deny_permissions = Some(vec![ToolPermission::Network]);
        let snap = decide(PermissionMode::Auto, "net.fetch", Some(ToolPermission::Network), &ov);
        assert_eq!(snap.decision, DecisionKind::Deny);
        assert_eq!(snap.sources[0].rule, "override:deny_permission");
    }

    #[test]
    fn decide_is_deterministic() {
        let ov = overrides();
        let a = decide(PermissionMode::Ask, "x", None, &ov);
        let b = decide(PermissionMode::Ask, "x", None, &ov);
        assert_eq!(aex_core::hash_canonical(&a).unwrap(), aex_core::hash_canonical(&b).unwrap());
    }

    #[test]
    fn auditor_resolve_ask_appends_user_source() {
        let snap = decide(PermissionMode::Ask, "x", None, &overrides());
        let resolved = PolicyAuditor::resolve_ask(snap, false);
        assert_eq!(resolved.decision, DecisionKind::Deny);
        assert_eq!(resolved.sources.len(), 2);
        assert_eq!(resolved.sources[1].source, PolicySource::User);
    }

    #[test]
    fn auditor_tracks_allow_and_deny_counts() {
        let mut auditor = PolicyAuditor::new();
        auditor.evaluate(PermissionMode::Auto, "a", None, &overrides());
        let mut ov = overrides();
        ov.deny_tools = Some(vec!["b".into()]);
        auditor.evaluate(PermissionMode::Auto, "b", None, &ov);
        assert_eq!(auditor.allowed_count(), 1);
        assert_eq!(auditor.denied_count(), 1);
    }

    fn mode_strategy() -> impl proptest::strategy::Strategy<Value = PermissionMode> {
        proptest::prop_oneof![
            proptest::strategy::Just(PermissionMode::Auto),
            proptest::strategy::Just(PermissionMode::Ask),
            proptest::strategy::Just(PermissionMode::Yolo),
        ]
    }

    proptest::proptest! {
        #[test]
        fn decide_is_a_pure_function_of_its_inputs(
            mode in mode_strategy(),
            tool_name in "[a-z.]{1,12}",
        ) {
            let ov = overrides();
            let a = decide(mode, &tool_name, None, &ov);
            let b = decide(mode, &tool_name, None, &ov);
            proptest::prop_assert_eq!(
                aex_core::hash_canonical(&a).unwrap(),
                aex_core::hash_canonical(&b).unwrap()
            );
        }
    }
}
