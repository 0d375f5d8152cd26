//! Mounted templates.
//!
//! A [`Mount`] owns a host, a compiled template and the state it renders.
//! Its render watcher re-runs through the scheduler whenever state the last
//! render read is written, then patches the host with the new tree.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::eval::Scope;
use super::event::{self, DispatchOutcome, Event};
use super::helpers::StaticCache;
use super::host::{HostNode, HostOps, RecordingHost};
use super::interpreter::{render, Slots};
use super::patch::{collect_refs, Reconciler, RefTarget};
use super::vnode::VNodeRef;
use super::RuntimeConfig;
use crate::compiler::CompiledTemplate;
use crate::graph::{scheduler, SchedulerConfig};
use crate::reactive::{handle_error, WatchOptions, Watcher};
use crate::value::Value;

/// Hook run before each re-render.
pub type BeforeUpdate = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct MountOptions {
    pub config: RuntimeConfig,
    /// Rendered with `$error` in scope when the main template fails.
    pub fallback: Option<Arc<CompiledTemplate>>,
    pub slots: Slots,
    pub before_update: Option<BeforeUpdate>,
}

struct MountState<H> {
    template: Arc<CompiledTemplate>,
    scope: Scope,
    host: H,
    container: HostNode,
    cache: StaticCache,
    fallback: Option<Arc<CompiledTemplate>>,
    fallback_cache: StaticCache,
    slots: Slots,
    tree: Option<VNodeRef>,
    refs: IndexMap<String, RefTarget>,
    render_count: usize,
}

impl<H: HostOps> MountState<H> {
    fn update(&mut self) {
        let next = match render(&self.template, &self.scope, &mut self.cache, &self.slots) {
            Ok(tree) => tree,
            Err(err) => {
                handle_error(&err, "render");
                let Some(fallback) = self.fallback.clone() else { return };
                let scope = self.scope.child([("$error", Value::from(err.to_string()))]);
                match render(&fallback, &scope, &mut self.fallback_cache, &self.slots) {
                    Ok(tree) => tree,
                    Err(err) => {
                        handle_error(&err, "fallback render");
                        return;
                    }
                }
            }
        };

        Reconciler::new(&mut self.host).patch(self.tree.as_ref(), &next, self.container, None);
        self.refs = collect_refs(&next);
        self.tree = Some(next);
        self.render_count += 1;
        tracing::trace!(renders = self.render_count, "patched");
    }
}

/// A template rendered onto a host and kept in sync with its state.
pub struct Mount<H: HostOps + Send + 'static> {
    state: Arc<Mutex<MountState<H>>>,
    watcher: Watcher,
}

impl<H: HostOps + Send + 'static> Mount<H> {
    /// Render `template` against `state` into `container` and subscribe to
    /// what it read. The first render happens before this returns.
    pub fn new(template: Arc<CompiledTemplate>, state: Value, host: H, container: HostNode, options: MountOptions) -> Self {
        if let Some(max_update_count) = options.config.max_update_count {
            scheduler::configure(SchedulerConfig {
                max_update_count,
                ..scheduler::config()
            });
        }

        let scope = Scope::new(state, Arc::new(options.config));
        let mount_state = Arc::new(Mutex::new(MountState {
            template,
            scope,
            host,
            container,
            cache: StaticCache::new(),
            fallback: options.fallback,
            fallback_cache: StaticCache::new(),
            slots: options.slots,
            tree: None,
            refs: IndexMap::new(),
            render_count: 0,
        }));

        let getter_state = mount_state.clone();
        let watcher = Watcher::build(
            Arc::new(move || {
                getter_state.lock().update();
                Ok(Value::Null)
            }),
            None,
            options.before_update,
            WatchOptions {
                label: Some("render".to_string()),
                ..WatchOptions::default()
            },
        );

        Self {
            state: mount_state,
            watcher,
        }
    }

    pub fn tree(&self) -> Option<VNodeRef> {
        self.state.lock().tree.clone()
    }

    pub fn refs(&self) -> IndexMap<String, RefTarget> {
        self.state.lock().refs.clone()
    }

    pub fn render_count(&self) -> usize {
        self.state.lock().render_count
    }

    pub fn container(&self) -> HostNode {
        self.state.lock().container
    }

    /// The scope templates evaluate in.
    pub fn scope(&self) -> Scope {
        self.state.lock().scope.clone()
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Re-render now instead of waiting for a flush.
    pub fn update(&self) {
        self.watcher.run();
    }

    pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.state.lock().host)
    }

    pub fn with_host_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.state.lock().host)
    }

    /// Stop reacting to state and remove the rendered tree. The host stays
    /// reachable through [`Mount::with_host`].
    pub fn unmount(&self) {
        self.watcher.teardown();
        let mut state = self.state.lock();
        if let Some(tree) = state.tree.take() {
            Reconciler::new(&mut state.host).unmount(&tree);
        }
        state.refs.clear();
        state.cache.clear();
        state.fallback_cache.clear();
    }
}

impl Mount<RecordingHost> {
    /// Deliver `event` at `target`. The host lock is released before
    /// handlers run, so handlers may write state that re-renders inline.
    pub fn dispatch(&self, target: HostNode, event: &Event) -> DispatchOutcome {
        let path = self.state.lock().host.event_path(target, event);
        event::dispatch(&path, event)
    }

    /// Markup currently inside the container.
    pub fn html(&self) -> String {
        let state = self.state.lock();
        state.host.inner_html(state.container)
    }

    /// Elements with `tag` below the container.
    pub fn find(&self, tag: &str) -> Vec<HostNode> {
        let state = self.state.lock();
        state.host.find_by_tag(state.container, tag)
    }
}

impl<H: HostOps + Send + 'static> std::fmt::Debug for Mount<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("watcher", &self.watcher)
            .field("renders", &self.render_count())
            .finish()
    }
}
