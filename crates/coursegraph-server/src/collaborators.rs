//! Narrow interfaces to the external collaborators.
//!
//! The orchestrator never looks inside these: the generator produces
//! content from a context payload, the classifier picks a tier from an edit
//! instruction, and retrieval suggests extra nodes for Global contexts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use coursegraph_core::id::NodeId;
use coursegraph_core::node::{Content, NodeRef};
use coursegraph_storage::CourseId;

use crate::context::{ContextPayload, Tier};

/// Failures reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator is not configured: {0}")]
    Unavailable(String),

    #[error("collaborator request failed: {0}")]
    Request(String),

    #[error("collaborator returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Output of one generator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generated {
    pub content: Content,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        payload: &ContextPayload,
        instruction: &str,
    ) -> Result<Generated, CollaboratorError>;
}

#[async_trait]
pub trait TierClassifier: Send + Sync {
    async fn classify_tier(&self, instruction: &str) -> Result<Tier, CollaboratorError>;
}

#[async_trait]
pub trait Retrieval: Send + Sync {
    /// Nodes of the same course related to `node`, at most `budget` of them.
    async fn fetch_related(
        &self,
        node: NodeId,
        course: CourseId,
        budget: usize,
    ) -> Result<Vec<NodeRef>, CollaboratorError>;
}

/// Retrieval that never suggests anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

#[async_trait]
impl Retrieval for NoRetrieval {
    async fn fetch_related(
        &self,
        _node: NodeId,
        _course: CourseId,
        _budget: usize,
    ) -> Result<Vec<NodeRef>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// The collaborator set shared by all courses.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Option<Arc<dyn Generator>>,
    pub classifier: Option<Arc<dyn TierClassifier>>,
    pub retrieval: Arc<dyn Retrieval>,
}

impl Collaborators {
    /// No generator, no classifier, no retrieval.
    pub fn none() -> Self {
        Collaborators {
            generator: None,
            classifier: None,
            retrieval: Arc::new(NoRetrieval),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TierClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_retrieval(mut self, retrieval: Arc<dyn Retrieval>) -> Self {
        self.retrieval = retrieval;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("generator", &self.generator.is_some())
            .field("classifier", &self.classifier.is_some())
            .finish_non_exhaustive()
    }
}
