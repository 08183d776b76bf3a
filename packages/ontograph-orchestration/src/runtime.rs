//! Service assembly
//!
//! Builds the stores, ontology services, graph synchronizer and an
//! [`Orchestrator`] with all six stage units registered. Backends come from
//! [`OntographConfig`] or are injected through [`Backends`].

use std::sync::Arc;

use ontograph_core::config::OntographConfig;
use ontograph_core::extraction::{provider_from_config, HttpExtractionCaller};
use ontograph_core::ontology::{DictionaryResolver, OntologyIngestor, ReferenceTracker, RemovalReport};
use ontograph_core::{
    graph_store_from_config, EmbeddingProvider, ExtractionCaller, GraphStore, GraphSynchronizer,
    SyncReport,
};
use ontograph_storage::{
    ChunkId, Document, DocumentId, DocumentStore, ExecutionStore, PipelineExecution, SqliteStore,
    WorkspaceId,
};
use tracing::{info, warn};

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::stages::{
    ChunkStage, ExtractOntologyStage, GraphSyncStage, LlmProcessStage, ParseStage, VectorizeStage,
};

/// External backends of one runtime
pub struct Backends {
    pub caller: Arc<dyn ExtractionCaller>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub graph: Arc<dyn GraphStore>,
}

impl Backends {
    pub fn from_config(config: &OntographConfig) -> Result<Self> {
        let caller = HttpExtractionCaller::from_config(&config.extraction)?;
        Ok(Self {
            caller: Arc::new(caller),
            embedder: provider_from_config(&config.embedding)?,
            graph: graph_store_from_config(&config.graph)?,
        })
    }
}

pub struct Runtime {
    pub store: Arc<SqliteStore>,
    pub tracker: Arc<ReferenceTracker>,
    pub ingestor: Arc<OntologyIngestor>,
    pub synchronizer: Arc<GraphSynchronizer>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Runtime {
    /// Open the configured database and HTTP/in-memory backends
    pub fn from_config(config: &OntographConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.database)?);
        let backends = Backends::from_config(config)?;
        Self::assemble(config, store, backends)
    }

    pub fn assemble(config: &OntographConfig, store: Arc<SqliteStore>, backends: Backends) -> Result<Self> {
        let documents: Arc<dyn DocumentStore> = store.clone();
        let executions: Arc<dyn ExecutionStore> = store.clone();

        let resolver = Arc::new(DictionaryResolver::new(store.clone(), &config.resolver));
        let tracker = Arc::new(ReferenceTracker::new(store.clone()));
        let ingestor = Arc::new(OntologyIngestor::new(resolver, tracker.clone()));
        let synchronizer = Arc::new(GraphSynchronizer::from_config(
            store.clone(),
            backends.graph,
            backends.embedder.clone(),
            &config.graph,
        ));

        let error_limit = config.pipeline.error_message_limit;
        let orchestrator = Orchestrator::with_default_pipeline(executions, config.pipeline.clone())?
            .with_handler(Arc::new(ParseStage::new(documents.clone())))
            .with_handler(Arc::new(
                ChunkStage::new(documents.clone(), config.chunking.clone()).with_tracker(tracker.clone()),
            ))
            .with_handler(Arc::new(
                LlmProcessStage::new(documents.clone(), backends.caller)
                    .with_prompt(config.extraction.prompt_ref.clone())
                    .with_concurrency(config.extraction.max_concurrent_chunks)
                    .with_error_limit(error_limit),
            ))
            .with_handler(Arc::new(
                VectorizeStage::new(documents.clone(), backends.embedder)
                    .with_batch_size(config.embedding.batch_size),
            ))
            .with_handler(Arc::new(
                ExtractOntologyStage::new(documents, ingestor.clone()).with_error_limit(error_limit),
            ))
            .with_handler(Arc::new(GraphSyncStage::new(synchronizer.clone())));
        orchestrator.validate()?;

        Ok(Self {
            store,
            tracker,
            ingestor,
            synchronizer,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// Store a new document; the pipeline is not started
    pub async fn ingest_document(
        &self,
        workspace_id: WorkspaceId,
        title: &str,
        content: &str,
    ) -> Result<Document> {
        let document = self.store.create_document(workspace_id, title, content).await?;
        info!(workspace_id, document_id = document.id, title, "Stored document");
        Ok(document)
    }

    pub async fn status(&self, document_id: DocumentId) -> Result<Option<PipelineExecution>> {
        Ok(self.store.latest_execution_for_document(document_id).await?)
    }

    /// Drop the references of a document (or only of `chunk_ids`) and sweep orphans
    pub async fn remove_document_source(
        &self,
        document_id: DocumentId,
        chunk_ids: &[ChunkId],
    ) -> Result<RemovalReport> {
        Ok(self.tracker.remove_document_source(document_id, chunk_ids).await?)
    }

    /// [`Runtime::remove_document_source`], then rebuild the document's
    /// workspace graph when the sweep deleted anything
    pub async fn remove_and_resync(
        &self,
        document_id: DocumentId,
        chunk_ids: &[ChunkId],
    ) -> Result<(RemovalReport, Option<SyncReport>)> {
        let report = self.remove_document_source(document_id, chunk_ids).await?;
        let sync = resync_after_removal(self.store.as_ref(), &self.synchronizer, document_id, &report).await?;
        Ok((report, sync))
    }
}

/// Drop-and-resync the workspace of `document_id` if `report` swept entries
///
/// Upserting syncs never delete nodes, so swept entries stay searchable in
/// the graph until the workspace is rebuilt.
pub async fn resync_after_removal(
    documents: &dyn DocumentStore,
    synchronizer: &GraphSynchronizer,
    document_id: DocumentId,
    report: &RemovalReport,
) -> Result<Option<SyncReport>> {
    let swept = report.sweep.as_ref().map_or(0, |sweep| sweep.total());
    if swept == 0 {
        return Ok(None);
    }
    let Some(document) = documents.get_document(document_id).await? else {
        warn!(document_id, swept, "Document not found; graph left as is");
        return Ok(None);
    };
    info!(
        workspace_id = document.workspace_id,
        document_id,
        swept,
        "Rebuilding workspace graph after sweep"
    );
    let sync = synchronizer.sync_workspace(document.workspace_id, true).await?;
    Ok(Some(sync))
}
