//! Expansion hooks ahead of internal call sites.
//!
//! Members reached by a trace carry the incremental fragment. Before every call they make,
//! the fragment reports the callee and the trace scope to the expander, which instruments the
//! callee on first sight. Calls of a member to itself and calls into units the trace's
//! restriction excludes are left alone.

use crate::{
    description::{RestrictionSet, ScopeId},
    host::{ExpansionSite, MethodBody, Statement},
    probe::{METHOD_SIGNATURE, SCOPE_ID},
};

/// One trace scope whose hook is placed ahead of call sites.
pub struct ExpansionHook<'a> {
    /// Trace scope
    pub scope_id: ScopeId,
    /// Restriction of the trace
    pub restriction: &'a RestrictionSet,
    /// Incremental fragment with placeholders intact
    pub code: &'a [String],
}

/// Inserts expansion hooks ahead of the call sites of a body.
///
/// # Arguments
///
/// * `body` - Body to rewrite, taken from the pristine code
/// * `caller` - Fully-qualified signature of the member owning `body`
/// * `hooks` - Trace scopes to report to
///
/// # Returns
///
/// The number of hooks inserted.
pub fn rewrite_call_sites(body: &mut MethodBody, caller: &str, hooks: &[ExpansionHook<'_>]) -> usize {
    if hooks.is_empty() {
        return 0;
    }

    let mut inserted = 0;
    let mut rewritten = Vec::with_capacity(body.statements.len());
    for statement in body.statements.drain(..) {
        if let Statement::Call(site) = &statement {
            let callee = site.signature();
            if callee != caller {
                for hook in hooks {
                    if hook.restriction.is_excluded(&site.unit) {
                        continue;
                    }
                    rewritten.push(Statement::Expansion(ExpansionSite {
                        callee: callee.clone(),
                        scope_id: hook.scope_id,
                        code: render(hook.code, &callee, hook.scope_id),
                    }));
                    inserted += 1;
                }
            }
        }
        rewritten.push(statement);
    }
    body.statements = rewritten;
    inserted
}

fn render(code: &[String], callee: &str, scope_id: ScopeId) -> Vec<String> {
    let literal = format!("\"{}\"", callee);
    let id = scope_id.to_string();
    code.iter()
        .map(|line| line.replace(SCOPE_ID, &id).replace(METHOD_SIGNATURE, &literal))
        .collect()
}
