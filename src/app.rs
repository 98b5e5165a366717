//! Wires settings, collaborators, agents, router and session store into an
//! [`Orchestrator`].

use crate::collaborators::{
    CommandCompletion, CommandConverter, CommandValidator, ConversionLibrary, GuardedCompletion,
    TextCompletion, UnavailableCompletion, Validator,
};
use crate::config::{ConfigError, Settings};
use crate::conversion::{known_formats, ConversionAgent};
use crate::evaluation::EvaluationAgent;
use crate::orchestration::Orchestrator;
use crate::protocol::{MessageRouter, ProtocolError};
use crate::session::SessionStore;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("tools.{0} is not configured")]
    MissingTool(&'static str),
}

#[derive(Clone)]
pub struct Collaborators {
    pub library: Arc<dyn ConversionLibrary>,
    pub validator: Arc<dyn Validator>,
    pub completion: Arc<dyn TextCompletion>,
}

impl Collaborators {
    /// Process-backed collaborators from `tools.*`. Completion is optional.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let converter = settings
            .tools
            .converter
            .clone()
            .ok_or(AppError::MissingTool("converter"))?;
        let validator = settings
            .tools
            .validator
            .clone()
            .ok_or(AppError::MissingTool("validator"))?;
        let completion: Arc<dyn TextCompletion> = match settings.tools.completion.clone() {
            Some(command) => Arc::new(CommandCompletion::new(
                command,
                settings.timeouts.completion(),
            )),
            None => Arc::new(UnavailableCompletion),
        };
        Ok(Self {
            library: Arc::new(CommandConverter::new(converter, known_formats())),
            validator: Arc::new(CommandValidator::new(validator)),
            completion,
        })
    }
}

pub fn build_router(
    settings: &Settings,
    collaborators: Collaborators,
) -> Result<MessageRouter, AppError> {
    let completion = GuardedCompletion::new(collaborators.completion, settings.timeouts.completion());
    let router = MessageRouter::builder()
        .register(Arc::new(ConversionAgent::new(
            collaborators.library,
            completion.clone(),
            settings.detection.confidence_threshold,
        )))?
        .register(Arc::new(EvaluationAgent::new(
            collaborators.validator,
            completion,
        )))?
        .log_to(settings.state_root.clone())
        .build();
    Ok(router)
}

pub fn build_orchestrator(
    settings: Settings,
    collaborators: Collaborators,
) -> Result<Orchestrator, AppError> {
    settings.validate()?;
    let router = build_router(&settings, collaborators)?;
    let store = SessionStore::new(settings.state_root.clone());
    Ok(Orchestrator::new(Arc::new(router), Arc::new(store), settings))
}
