//! Pipeline builders
//!
//! Assemble a linear chain of components inside a composite in one call.

use serde_json::Value;

use loom_composite::{BreakerConfig, Composite, CompositeConfig, ConnectionOptions, FlowReport};
use loom_core::{
    Component, ComponentId, ConnectionId, ConnectionType, Environment, EventDispatcher, Identity,
    LoomResult, Processor, SharedComponent,
};

struct Stage {
    name: String,
    processor: Option<Box<dyn Processor>>,
}

/// Builds `stage_0 -> stage_1 -> ... -> stage_n` as a READY composite
pub struct PipelineBuilder {
    name: String,
    environment: Environment,
    dispatcher: EventDispatcher,
    config: CompositeConfig,
    options: ConnectionOptions,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            environment: Environment::new("pipeline-test"),
            dispatcher: EventDispatcher::default(),
            config: CompositeConfig::default(),
            options: ConnectionOptions::default(),
            stages: Vec::new(),
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Breaker used on every link of the chain
    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.options.breaker = Some(breaker);
        self
    }

    /// Mark every link critical
    pub fn critical(mut self) -> Self {
        self.options.critical = true;
        self
    }

    /// Pass-through stage
    pub fn stage(mut self, name: &str) -> Self {
        self.stages.push(Stage {
            name: name.to_string(),
            processor: None,
        });
        self
    }

    pub fn stage_with<P: Processor + 'static>(mut self, name: &str, processor: P) -> Self {
        self.stages.push(Stage {
            name: name.to_string(),
            processor: Some(Box::new(processor)),
        });
        self
    }

    pub fn build(self) -> LoomResult<Pipeline> {
        let mut composite = Composite::with_config(
            &self.name,
            &self.environment,
            self.config,
            self.dispatcher.clone(),
        );

        let mut stages = Vec::with_capacity(self.stages.len());
        for stage in self.stages {
            let mut builder = Component::builder(Identity::create_root(&stage.name, &self.environment))
                .environment(self.environment.clone())
                .dispatcher(self.dispatcher.clone());
            if let Some(processor) = stage.processor {
                builder = builder.processor(BoxedProcessor(processor));
            }
            let handle = builder.build_shared()?;
            let id = composite.add_component(handle.clone())?;
            stages.push((stage.name, id, handle));
        }

        let mut links = Vec::with_capacity(stages.len().saturating_sub(1));
        for pair in stages.windows(2) {
            let connection = composite
                .connect_with(pair[0].1, pair[1].1, ConnectionType::DataFlow, self.options.clone())?
                .id();
            links.push(connection);
        }

        composite.mark_ready()?;
        Ok(Pipeline {
            composite,
            stages,
            links,
        })
    }
}

struct BoxedProcessor(Box<dyn Processor>);

impl Processor for BoxedProcessor {
    fn process(&mut self, input: Value) -> Result<Value, String> {
        self.0.process(input)
    }
}

/// A built chain and handles to its stages
pub struct Pipeline {
    pub composite: Composite,
    stages: Vec<(String, ComponentId, SharedComponent)>,
    links: Vec<ConnectionId>,
}

impl Pipeline {
    pub fn activate(&mut self) -> LoomResult<()> {
        self.composite.activate()
    }

    pub fn run(&self, inputs: Vec<Value>) -> LoomResult<FlowReport> {
        self.composite.execute_data_flow(inputs)
    }

    pub fn stage_id(&self, name: &str) -> Option<ComponentId> {
        self.stages.iter().find(|(n, _, _)| n == name).map(|(_, id, _)| *id)
    }

    pub fn stage(&self, name: &str) -> Option<&SharedComponent> {
        self.stages.iter().find(|(n, _, _)| n == name).map(|(_, _, h)| h)
    }

    /// Connection from stage `index` to stage `index + 1`
    pub fn link(&self, index: usize) -> Option<ConnectionId> {
        self.links.get(index).copied()
    }

    pub fn sink(&self) -> Option<ComponentId> {
        self.stages.last().map(|(_, id, _)| *id)
    }

    pub fn into_composite(self) -> Composite {
        self.composite
    }
}

/// Integer items `0..n` as JSON values
pub fn numbered_items(n: usize) -> Vec<Value> {
    (0..n).map(|i| Value::from(i as u64)).collect()
}
