/// Memoized invocation of quests
///
/// An invocation goes through three layers, cheapest first:
///
/// 1. The context memo, keyed by quest digest, edit digests and effective
///    arguments. A hit returns the very same `Arc<Response>`.
/// 2. The backing store, keyed by the call hash. A stored record is only
///    reused if its quest and every recorded dependency are definitions the
///    context currently recognizes.
/// 3. Execution: render the template (nested quests fold into this frame),
///    parse it, merge the effective arguments over it and run the backend.
///
/// Every layer runs inside a [`FrameGuard`], so the caller's frame sees this
/// quest and its dependencies whether the result was memoized, cached or
/// freshly executed. A cache-only miss leaves nothing in the caller's frame.
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::call_stack::{Frame, FrameGuard};
use crate::context::Context;
use crate::edit::Edit;
use crate::error::{Error, Result};
use crate::hashing::{canonical_json, hash_json};
use crate::output::Response;
use crate::quest::args::{effective_args, Args};
use crate::quest::{Definition, Quest};
use crate::render::{Resolved, Scope};
use crate::store::records::{self, InvocationRecord};

/// Identity of one invocation within a context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    digest: String,
    edits: Vec<String>,
    args: String,
}

impl InvocationKey {
    pub fn new(definition: &Definition, edits: &[Arc<Edit>], args: &Args) -> Result<Self> {
        Ok(Self {
            digest: definition.digest().to_string(),
            edits: edits.iter().map(|e| e.digest()).collect::<Result<_>>()?,
            args: canonical_json(&Value::Object(args.clone())),
        })
    }
}

/// Memo entry for an invocation that produced a result
#[derive(Debug, Clone)]
pub struct Memoized {
    pub response: Arc<Response>,
    /// Concrete quest that produced the response
    pub quest: Quest,
    pub dependencies: Vec<Quest>,
}

/// Hash of everything the backend saw apart from the template itself
///
/// Effective arguments plus the content of each edit under `post<i>`.
pub fn call_hash(edits: &[Arc<Edit>], args: &Args) -> Result<String> {
    let mut payload = args.clone();
    for (i, edit) in edits.iter().enumerate() {
        payload.insert(format!("post{}", i), Value::String(edit.content()?));
    }
    Ok(hash_json(&Value::Object(payload)))
}

/// Merge defaults, caller overrides and the context tier
///
/// The context tier is the global overrides restricted to keys the
/// definition declares, with the overrides attached to the resolved name on
/// top.
pub fn arguments(ctx: &Context, definition: &Definition, caller: &Args) -> Result<Args> {
    let settings = ctx.settings();

    let mut context_tier = Args::new();
    for (key, value) in &settings.global_overrides {
        if definition.default_args.contains_key(key) {
            context_tier.insert(key.clone(), value.clone());
        } else {
            debug!(quest = %definition.full_name(), key = %key, "global override not declared, skipped");
        }
    }
    for (key, value) in &definition.overrides {
        context_tier.insert(key.clone(), value.clone());
    }

    let mut caller = caller.clone();
    if definition.default_method() == Some("static") {
        caller.remove("method");
        context_tier.remove("method");
    }

    effective_args(&definition.default_args, &caller, &context_tier, settings.merge_mode)
}

/// Invoke a definition on edits
///
/// Returns `None` only when the context is cache-only and nothing usable is
/// stored.
pub fn invoke(
    ctx: &Context,
    definition: &Definition,
    edits: &[Arc<Edit>],
    caller: &Args,
) -> Result<Option<Arc<Response>>> {
    ctx.check_owner()?;
    let name = definition.full_name();
    let args = arguments(ctx, definition, caller)?;
    let key = InvocationKey::new(definition, edits, &args)?;

    if let Some(entry) = ctx.memo_get(&key) {
        let guard = FrameGuard::enter(ctx.call_stack(), definition.stored_quest());
        debug!(quest = %name, operation = "invoke", status = "memo", "memo hit");
        return match entry {
            Some(memoized) => {
                guard.record_hit(memoized.quest, memoized.dependencies)?;
                finish_frame(ctx, guard)?;
                Ok(Some(memoized.response))
            }
            None => {
                abandon_frame(ctx, guard)?;
                Ok(None)
            }
        };
    }

    let guard = FrameGuard::enter(ctx.call_stack(), definition.stored_quest());
    let call_hash = call_hash(edits, &args)?;
    let settings = ctx.settings();

    if settings.read_cache {
        match records::find_cached(ctx.store(), &definition.quest(), &call_hash, ctx.recognized_digests()) {
            Ok(Some(hit)) => {
                guard.record_hit(hit.quest.clone(), hit.dependencies.clone())?;
                finish_frame(ctx, guard)?;
                info!(
                    quest = %name,
                    operation = "invoke",
                    status = "hit",
                    call_hash = %call_hash,
                    digest = %hit.quest.digest,
                    "cache hit"
                );
                let response = Arc::new(hit.response);
                ctx.memo_insert(
                    key,
                    Some(Memoized {
                        response: response.clone(),
                        quest: hit.quest,
                        dependencies: hit.dependencies,
                    }),
                );
                return Ok(Some(response));
            }
            Ok(None) => {}
            Err(Error::IncompatibleCache(reason)) => {
                warn!(
                    quest = %name,
                    call_hash = %call_hash,
                    reason = %reason,
                    "ignoring incompatible cache record"
                );
            }
            Err(e) => return Err(e),
        }
    }

    if settings.only_cache {
        abandon_frame(ctx, guard)?;
        info!(quest = %name, operation = "invoke", status = "miss", call_hash = %call_hash, "not cached, skipping");
        ctx.memo_insert(key, None);
        return Ok(None);
    }

    info!(quest = %name, operation = "invoke", status = "miss", call_hash = %call_hash, "executing");
    let rendered = render_merged(ctx, definition, edits, &args)?;
    let output = ctx.executor().execute(rendered)?;
    let response = Arc::new(Response::new(output));
    let dependencies = guard.dependencies()?;

    if settings.write_cache {
        let quest = definition.stored_quest();
        records::write_invocation(
            ctx.store(),
            &InvocationRecord {
                edits,
                quest: &quest,
                response: &response,
                call_hash: &call_hash,
                dependencies: &dependencies,
            },
        )?;
        debug!(quest = %name, entry_count = dependencies.len(), "stored invocation");
    }

    finish_frame(ctx, guard)?;
    ctx.memo_insert(
        key,
        Some(Memoized {
            response: response.clone(),
            quest: definition.stored_quest(),
            dependencies,
        }),
    );
    Ok(Some(response))
}

/// Render and parse a definition without executing it
///
/// Nested quests referenced by the template are still invoked.
pub fn render_parse(ctx: &Context, definition: &Definition, edits: &[Arc<Edit>], caller: &Args) -> Result<Args> {
    ctx.check_owner()?;
    let args = arguments(ctx, definition, caller)?;
    let guard = FrameGuard::enter(ctx.call_stack(), definition.stored_quest());
    let rendered = render_merged(ctx, definition, edits, &args)?;
    finish_frame(ctx, guard)?;
    Ok(rendered)
}

fn finish_frame(ctx: &Context, guard: FrameGuard<'_>) -> Result<Frame> {
    let frame = guard.finish()?;
    if ctx.depth() == 0 {
        ctx.set_last_root(frame.clone());
    }
    Ok(frame)
}

/// Leave a frame that produced no result; the caller records no dependency
fn abandon_frame(ctx: &Context, guard: FrameGuard<'_>) -> Result<Frame> {
    let frame = guard.abandon()?;
    if ctx.depth() == 0 {
        ctx.set_last_root(frame.clone());
    }
    Ok(frame)
}

fn render_merged(ctx: &Context, definition: &Definition, edits: &[Arc<Edit>], args: &Args) -> Result<Args> {
    let scope = InvocationScope { ctx, edits, args };
    let text = definition.template().render(&scope, &definition.alias)?;

    let document: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| {
        Error::config(format!("{} rendered to invalid yaml: {}", definition.full_name(), e))
    })?;
    let mut rendered = match serde_json::to_value(document) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(Error::config(format!(
                "{} must render to a map, got {}",
                definition.full_name(),
                other
            )))
        }
        Err(e) => {
            return Err(Error::config(format!(
                "{} rendered to an unsupported document: {}",
                definition.full_name(),
                e
            )))
        }
    };

    let is_static = rendered.get("method").and_then(Value::as_str) == Some("static")
        || definition.default_method() == Some("static");
    for (key, value) in args {
        if is_static && key == "method" {
            continue;
        }
        rendered.insert(key.clone(), value.clone());
    }
    Ok(rendered)
}

/// Names visible while rendering one invocation
struct InvocationScope<'a> {
    ctx: &'a Context,
    edits: &'a [Arc<Edit>],
    args: &'a Args,
}

impl Scope for InvocationScope<'_> {
    fn root(&self, name: &str) -> Option<Resolved> {
        match name {
            "post" => return self.edits.first().cloned().map(Resolved::Edit),
            "posts" => return Some(Resolved::Edits(self.edits.to_vec())),
            _ => {}
        }
        if let Some(index) = name.strip_prefix("post").and_then(|i| i.parse::<usize>().ok()) {
            return self.edits.get(index).cloned().map(Resolved::Edit);
        }
        self.args.get(name).cloned().map(Resolved::Json)
    }

    fn is_quest(&self, name: &str) -> bool {
        self.ctx.registry().contains(name)
    }

    fn invoke(&self, quest: &str, edits: Vec<Arc<Edit>>, overrides: Args) -> Result<Resolved> {
        let definition = self.ctx.resolve(quest)?;
        Ok(match invoke(self.ctx, &definition, &edits, &overrides)? {
            Some(response) => Resolved::Response(response),
            None => Resolved::Missing,
        })
    }
}
