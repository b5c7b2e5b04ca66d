//! Handler registry: modules, their bindings, and atomic reload.
//!
//! Every module contributes to a [`Bindings`] table through
//! [`Module::register`]. A reload builds a complete new table from the
//! enabled modules, runs their startup hooks, and only then swaps it in, so
//! dispatchers always see either the old table or the new one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use super::context::Context;
use crate::bot::Services;
use crate::error::{HandlerError, HandlerResult};

/// Something that handles a dispatched message.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Context) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: Context) -> HandlerResult {
        (self)(ctx).await
    }
}

/// A named group of bindings that can be enabled by the `modules` option.
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;
    fn register(&self, bindings: &mut Bindings);
}

/// Event binding priority. Higher priorities run first for each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];
}

pub type StartupHook = Arc<dyn Fn(&Services) -> Result<(), HandlerError> + Send + Sync>;
pub type Builder = Arc<dyn Fn(&mut Context) + Send + Sync>;

#[derive(Clone)]
pub struct CommandBinding {
    pub module: &'static str,
    pub doc: &'static str,
    pub handler: Arc<dyn Handler>,
}

#[derive(Clone)]
pub struct EventBinding {
    pub module: &'static str,
    /// Run in the executor pool instead of inline in the event dispatcher.
    pub concurrent: bool,
    pub handler: Arc<dyn Handler>,
}

/// One complete handler table.
#[derive(Default)]
pub struct Bindings {
    module: &'static str,
    commands: HashMap<String, CommandBinding>,
    events: HashMap<(Priority, String), Vec<EventBinding>>,
    startup: Vec<(&'static str, StartupHook)>,
    builders: Vec<Builder>,
}

impl Bindings {
    /// Bind command `name`. A later binding of the same name replaces the
    /// earlier one.
    pub fn command<F, Fut>(&mut self, name: &str, doc: &'static str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let binding = CommandBinding {
            module: self.module,
            doc,
            handler: Arc::new(handler),
        };
        if let Some(previous) = self.commands.insert(name.to_string(), binding) {
            warn!(
                command = name,
                previous = previous.module,
                module = self.module,
                "Duplicate command, last definition wins"
            );
        }
    }

    /// Bind an event: a command verb, `*` for every message, or `1st` for
    /// the first message of a connection.
    pub fn event<F, Fut>(&mut self, name: &str, priority: Priority, concurrent: bool, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.events
            .entry((priority, name.to_ascii_uppercase()))
            .or_default()
            .push(EventBinding {
                module: self.module,
                concurrent,
                handler: Arc::new(handler),
            });
    }

    /// Run `hook` after each reload, before the new table is installed.
    pub fn startup<F>(&mut self, hook: F)
    where
        F: Fn(&Services) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.startup.push((self.module, Arc::new(hook)));
    }

    /// Augment every context built for dispatch.
    pub fn builder<F>(&mut self, builder: F)
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.builders.push(Arc::new(builder));
    }

    pub fn get_command(&self, name: &str) -> Option<&CommandBinding> {
        self.commands.get(name)
    }

    /// Event bindings for `name` at `priority`, in registration order.
    pub fn events_for(&self, priority: Priority, name: &str) -> &[EventBinding] {
        self.events
            .get(&(priority, name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Command names with their docs, sorted.
    pub fn commands(&self) -> Vec<(&str, &'static str)> {
        let mut all: Vec<_> = self
            .commands
            .iter()
            .map(|(name, binding)| (name.as_str(), binding.doc))
            .collect();
        all.sort_unstable();
        all
    }

    /// Build a dispatch context, applying every builder in order.
    pub fn context(&self, message: Arc<slirc_proto::Message>, services: Services) -> Context {
        let mut ctx = Context::new(message, services);
        for builder in &self.builders {
            builder(&mut ctx);
        }
        ctx
    }

    fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.events.is_empty()
    }
}

/// The live handler table and the catalogue of modules it is built from.
pub struct Registry {
    catalogue: RwLock<Vec<Arc<dyn Module>>>,
    bindings: RwLock<Arc<Bindings>>,
}

impl Registry {
    /// A registry over `catalogue`. Nothing is bound until the first reload.
    pub fn new(catalogue: Vec<Arc<dyn Module>>) -> Self {
        Self {
            catalogue: RwLock::new(catalogue),
            bindings: RwLock::new(Arc::new(Bindings::default())),
        }
    }

    /// Add a module to the catalogue, replacing any of the same name. It
    /// takes effect on the next reload if enabled.
    pub fn install(&self, module: Arc<dyn Module>) {
        let mut catalogue = self.catalogue.write();
        catalogue.retain(|m| m.name() != module.name());
        catalogue.push(module);
    }

    /// The table in effect right now.
    pub fn current(&self) -> Arc<Bindings> {
        Arc::clone(&self.bindings.read())
    }

    /// Build a table from the modules named in `enabled`.
    pub fn build(&self, enabled: &[String]) -> Result<Bindings, HandlerError> {
        let catalogue = self.catalogue.read().clone();
        let mut bindings = Bindings::default();

        for name in enabled {
            match catalogue.iter().find(|m| m.name() == name.as_str()) {
                Some(module) => {
                    bindings.module = module.name();
                    module.register(&mut bindings);
                    debug!(module = module.name(), "Registered module");
                }
                None => warn!(module = %name, "Unknown module, skipping"),
            }
        }
        bindings.module = "";

        if bindings.is_empty() {
            return Err(HandlerError::Internal(
                "no handlers were registered".to_string(),
            ));
        }
        Ok(bindings)
    }

    /// Rebuild from the `modules` option, run startup hooks, and swap the
    /// new table in. On failure the old table stays in effect.
    pub fn reload(&self, services: &Services) -> Result<(), HandlerError> {
        let enabled = services.options.list("modules");
        let bindings = self.build(&enabled)?;

        for (module, hook) in &bindings.startup {
            hook(services).map_err(|e| {
                HandlerError::Internal(format!("startup hook of {module} failed: {e}"))
            })?;
        }

        let names: Vec<&str> = enabled
            .iter()
            .map(String::as_str)
            .filter(|name| self.catalogue.read().iter().any(|m| m.name() == *name))
            .collect();
        services.data.set("modules", json!(names));

        let commands = bindings.commands.len();
        *self.bindings.write() = Arc::new(bindings);
        info!(modules = ?names, commands, "Handlers loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter;

    impl Module for Greeter {
        fn name(&self) -> &'static str {
            "greeter"
        }

        fn register(&self, bindings: &mut Bindings) {
            bindings.command("hello", "Say hello", |ctx| async move { ctx.reply("hello").await });
            bindings.event("join", Priority::Low, false, |_ctx| async { Ok(()) });
        }
    }

    struct Shadow;

    impl Module for Shadow {
        fn name(&self) -> &'static str {
            "shadow"
        }

        fn register(&self, bindings: &mut Bindings) {
            bindings.command("hello", "Shadowed hello", |_ctx| async { Ok(()) });
        }
    }

    #[test]
    fn build_collects_enabled_modules() {
        let registry = Registry::new(vec![Arc::new(Greeter), Arc::new(Shadow)]);
        let bindings = registry.build(&["greeter".to_string()]).unwrap();

        assert_eq!(bindings.commands(), vec![("hello", "Say hello")]);
        assert_eq!(bindings.events_for(Priority::Low, "JOIN").len(), 1);
        assert!(bindings.events_for(Priority::High, "JOIN").is_empty());
    }

    #[test]
    fn last_duplicate_wins() {
        let registry = Registry::new(vec![Arc::new(Greeter), Arc::new(Shadow)]);
        let bindings = registry
            .build(&["greeter".to_string(), "shadow".to_string()])
            .unwrap();
        let binding = bindings.get_command("hello").unwrap();
        assert_eq!(binding.module, "shadow");
        assert_eq!(binding.doc, "Shadowed hello");
    }

    #[test]
    fn empty_table_is_rejected() {
        let registry = Registry::new(vec![Arc::new(Greeter)]);
        assert!(registry.build(&["missing".to_string()]).is_err());
        assert!(registry.build(&[]).is_err());
    }

    #[test]
    fn install_replaces_by_name() {
        let registry = Registry::new(vec![Arc::new(Greeter)]);
        registry.install(Arc::new(Greeter));
        assert_eq!(registry.catalogue.read().len(), 1);
    }
}
