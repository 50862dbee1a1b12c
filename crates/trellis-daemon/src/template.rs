// SPDX-License-Identifier: MIT

//! Re-expansion of unexpanded service configuration against a worktree's
//! template context, for the activation cascade.

use std::collections::HashMap;

use handlebars::Handlebars;
use serde_json::{json, Value};
use tracing::warn;
use trellis_core::service::{Command, ServiceDescriptor};
use trellis_core::worktree::WorktreeDescriptor;

/// Render a single template string, falling back to the raw template on
/// error. Errors (an unterminated `{{`, an unknown helper) are logged, not
/// propagated, since a broken template for one field must not prevent the
/// rest of the service from starting with its other fields expanded.
fn expand_str(handlebars: &Handlebars<'static>, template: &str, ctx: &Value) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    handlebars
        .render_template(template, ctx)
        .unwrap_or_else(|err| {
            warn!(error = %err, template, "failed to expand config template, using raw");
            template.to_string()
        })
}

fn worktree_context(worktree: Option<&WorktreeDescriptor>, service_name: &str) -> Value {
    let worktree_ctx = match worktree {
        Some(w) => json!({
            "Root": w.path,
            "Branch": w.branch,
            "Name": w.name.as_str(),
            "Binaries": w.template_context,
        }),
        None => json!({
            "Root": "",
            "Branch": "",
            "Name": "",
            "Binaries": {},
        }),
    };
    json!({
        "Worktree": worktree_ctx,
        "Service": { "Name": service_name },
    })
}

/// Re-expand one unexpanded [`ServiceDescriptor`] against a worktree's
/// template context. String fields (`command`, `working_dir`, `env` values,
/// `watched_binary`, `watched_files`) are rendered; everything else (name,
/// restart policy, signals, timeouts) is not templated and is copied as-is.
pub fn expand_service(
    handlebars: &Handlebars<'static>,
    raw: &ServiceDescriptor,
    worktree: Option<&WorktreeDescriptor>,
) -> ServiceDescriptor {
    let ctx = worktree_context(worktree, raw.name.as_str());

    let command = match &raw.command {
        Command::Shell(s) => Command::Shell(expand_str(handlebars, s, &ctx)),
        Command::Argv(argv) => Command::Argv(
            argv.iter()
                .map(|a| expand_str(handlebars, a, &ctx))
                .collect(),
        ),
    };

    let env: HashMap<String, String> = raw
        .env
        .iter()
        .map(|(k, v)| (k.clone(), expand_str(handlebars, v, &ctx)))
        .collect();

    ServiceDescriptor {
        name: raw.name.clone(),
        command,
        working_dir: expand_str(handlebars, &raw.working_dir, &ctx),
        env,
        watched_binary: raw
            .watched_binary
            .as_ref()
            .map(|p| expand_str(handlebars, p, &ctx)),
        watched_files: raw
            .watched_files
            .iter()
            .map(|p| expand_str(handlebars, p, &ctx))
            .collect(),
        restart_policy: raw.restart_policy,
        max_restarts: raw.max_restarts,
        restart_delay: raw.restart_delay,
        stop_signal: raw.stop_signal,
        stop_timeout: raw.stop_timeout,
        parser: raw.parser,
    }
}

/// Re-expand a working directory template against a worktree's context,
/// using an empty service name (workflows are not per-service).
pub fn expand_working_dir(
    handlebars: &Handlebars<'static>,
    raw: &str,
    worktree: Option<&WorktreeDescriptor>,
) -> String {
    let ctx = worktree_context(worktree, "");
    expand_str(handlebars, raw, &ctx)
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
