//! Execution context for pipeline execution.
//!
//! A [`RunContext`] carries everything one pipeline run shares between its
//! nodes: configuration, the parse cache, the environment snapshot taken at
//! start, the run-time property map, the extension resolver, the listener,
//! the registry of live IPC channel files and the live child processes.

use super::ipc::ChannelRegistry;
use super::listener::{ConsoleListener, ExecutionEvent, ExecutionListener};
use super::shell::ProcessExecutor;
use super::shutdown::{self, CancelHandle};
use crate::infrastructure::{
    Config, ExtensionResolver, LocalExtensionResolver, utf8_environment,
};
use crate::resolver::{Parser, PropertyMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Variable exported to every command with the engine version
pub const ENV_VERSION: &str = "PIPELINER_VERSION";

/// State shared by all nodes of one run
pub struct RunContext {
    execution_id: Uuid,
    config: Config,
    parser: Parser,
    os_environment: PropertyMap,
    environment: PropertyMap,
    properties: PropertyMap,
    extensions: Arc<dyn ExtensionResolver>,
    listener: Arc<dyn ExecutionListener>,
    channels: Arc<ChannelRegistry>,
    channel_directory: PathBuf,
    processes: ProcessExecutor,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("execution_id", &self.execution_id)
            .field("config", &self.config)
            .field("properties", &self.properties.len())
            .field("extensions", &self.extensions)
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates a context from `config`, snapshotting the process environment
    #[must_use]
    pub fn new(config: Config) -> Self {
        let listener: Arc<dyn ExecutionListener> =
            Arc::new(ConsoleListener::stdout(config.output, config.timestamps));
        let context = Self {
            execution_id: Uuid::new_v4(),
            parser: Parser::new(config.parse_cache_capacity),
            os_environment: utf8_environment(std::env::vars_os()),
            environment: PropertyMap::new(),
            properties: PropertyMap::new(),
            extensions: Arc::new(LocalExtensionResolver::new(config.extension_cache_capacity)),
            listener,
            channels: Arc::new(ChannelRegistry::new()),
            channel_directory: std::env::temp_dir(),
            processes: ProcessExecutor::new(config.kill_grace_period()),
            config,
        };
        shutdown::register(&context.cancel_handle());
        context
    }

    /// Replaces the listener
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Replaces the extension resolver
    #[must_use]
    pub fn with_extension_resolver(mut self, extensions: Arc<dyn ExtensionResolver>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Replaces the environment snapshot
    #[must_use]
    pub fn with_os_environment(mut self, environment: PropertyMap) -> Self {
        self.os_environment = environment;
        self
    }

    /// Adds variables layered over the snapshot, below any `env` block
    #[must_use]
    pub fn with_environment(mut self, environment: PropertyMap) -> Self {
        self.environment.extend(environment);
        self
    }

    /// Adds run-time properties; they win over every `with` block
    #[must_use]
    pub fn with_properties(mut self, properties: PropertyMap) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Directory where IPC channel files are created
    #[must_use]
    pub fn with_channel_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.channel_directory = directory.into();
        self
    }

    /// Unique id of this run
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse cache
    #[must_use]
    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Environment every step starts from: snapshot plus overrides plus
    /// [`ENV_VERSION`]
    #[must_use]
    pub fn base_environment(&self) -> PropertyMap {
        let mut environment = self.os_environment.clone();
        environment.extend(self.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        environment.insert(ENV_VERSION.to_string(), crate::VERSION.to_string());
        environment
    }

    /// Run-time properties
    #[must_use]
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Run-time properties, for captures and imports
    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    /// Consumes the context, returning the run-time properties
    #[must_use]
    pub fn into_properties(mut self) -> PropertyMap {
        std::mem::take(&mut self.properties)
    }

    /// Extension resolver
    #[must_use]
    pub fn extensions(&self) -> &dyn ExtensionResolver {
        self.extensions.as_ref()
    }

    /// Live channel files
    #[must_use]
    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    /// Where channel files go
    #[must_use]
    pub fn channel_directory(&self) -> &Path {
        &self.channel_directory
    }

    /// Process runner
    #[must_use]
    pub fn processes(&self) -> &ProcessExecutor {
        &self.processes
    }

    /// Handle that cancels this run from another thread
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(self.processes.groups()), Arc::clone(&self.channels))
    }

    /// Hands `event` to the listener
    pub fn emit(&self, event: &ExecutionEvent) {
        self.listener.on_event(event);
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.channels.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::listener::RecordingListener;
    use crate::executor::listener::NodeInfo;
    use crate::pipeline::NodeKind;

    #[test]
    fn test_base_environment_layers_overrides() {
        let context = RunContext::new(Config::default())
            .with_os_environment(PropertyMap::from([
                ("HOME".to_string(), "/home/a".to_string()),
                ("KEEP".to_string(), "1".to_string()),
            ]))
            .with_environment(PropertyMap::from([("HOME".to_string(), "/home/b".to_string())]));

        let environment = context.base_environment();
        assert_eq!(environment.get("HOME").map(String::as_str), Some("/home/b"));
        assert_eq!(environment.get("KEEP").map(String::as_str), Some("1"));
        assert_eq!(environment.get(ENV_VERSION).map(String::as_str), Some(crate::VERSION));
    }

    #[test]
    fn test_emit_reaches_listener() {
        let recorder = RecordingListener::new();
        let context = RunContext::new(Config::default()).with_listener(Arc::new(recorder.clone()));
        context.emit(&ExecutionEvent::Output {
            node: NodeInfo {
                kind: NodeKind::Step,
                name: None,
                id: None,
                location: "pipeline.jobs[0].steps[0]".to_string(),
            },
            line: "hi".to_string(),
        });
        assert_eq!(recorder.output(), ["hi"]);
    }

    #[test]
    fn test_properties_are_returned() {
        let mut context = RunContext::new(Config::default())
            .with_properties(PropertyMap::from([("a".to_string(), "1".to_string())]));
        context.properties_mut().insert("b".to_string(), "2".to_string());
        let properties = context.into_properties();
        assert_eq!(properties.len(), 2);
    }
}
