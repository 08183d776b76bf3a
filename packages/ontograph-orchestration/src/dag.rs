use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{OrchestratorError, Result};
use crate::job::StageId;

/// Stage node in DAG
#[derive(Debug, Clone)]
pub struct StageNode {
    pub id: StageId,
    pub name: &'static str,
    pub dependencies: Vec<StageId>,
    /// Overrides the pipeline-wide stage timeout
    pub timeout_ms: Option<u64>,
}

impl StageNode {
    pub fn new(id: StageId, name: &'static str, dependencies: Vec<StageId>) -> Self {
        Self {
            id,
            name,
            dependencies,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

fn display_name(id: StageId) -> &'static str {
    match id {
        StageId::Parse => "Parse",
        StageId::Chunk => "Chunk",
        StageId::LlmProcess => "LLM Extraction",
        StageId::Vectorize => "Vectorize",
        StageId::ExtractOntology => "Ontology Extraction",
        StageId::GraphSync => "Graph Sync",
    }
}

/// Pipeline DAG with topological sort
#[derive(Debug, Clone)]
pub struct PipelineDAG {
    stages: HashMap<StageId, StageNode>,
    execution_order: Vec<Vec<StageId>>, // Vec of parallel groups
}

impl PipelineDAG {
    /// Create a new DAG from stage definitions
    pub fn new(stages: Vec<StageNode>) -> Result<Self> {
        let mut stage_map = HashMap::new();
        for stage in stages {
            stage_map.insert(stage.id, stage);
        }

        for stage in stage_map.values() {
            for dep in &stage.dependencies {
                if !stage_map.contains_key(dep) {
                    return Err(OrchestratorError::MissingDependency(format!(
                        "Stage {} depends on non-existent stage {}",
                        stage.id, dep
                    )));
                }
            }
        }

        let execution_order = Self::topological_sort(&stage_map)?;

        Ok(Self {
            stages: stage_map,
            execution_order,
        })
    }

    /// PARSE → CHUNK → {LLM_PROCESS ∥ VECTORIZE} → EXTRACT_ONTOLOGY → GRAPH_SYNC
    pub fn default_pipeline() -> Result<Self> {
        use StageId::*;
        Self::new(vec![
            StageNode::new(Parse, display_name(Parse), vec![]),
            StageNode::new(Chunk, display_name(Chunk), vec![Parse]),
            StageNode::new(LlmProcess, display_name(LlmProcess), vec![Chunk]),
            StageNode::new(Vectorize, display_name(Vectorize), vec![Chunk]),
            StageNode::new(ExtractOntology, display_name(ExtractOntology), vec![LlmProcess]),
            StageNode::new(
                GraphSync,
                display_name(GraphSync),
                vec![ExtractOntology, Vectorize],
            ),
        ])
    }

    /// Integer-order plan: every stage depends on all stages of the previous order
    pub fn from_orders(orders: &[(StageId, u32)]) -> Result<Self> {
        let mut groups: BTreeMap<u32, Vec<StageId>> = BTreeMap::new();
        for &(stage, order) in orders {
            groups.entry(order).or_default().push(stage);
        }

        let mut nodes = Vec::with_capacity(orders.len());
        let mut previous: Vec<StageId> = Vec::new();
        for group in groups.into_values() {
            for &stage in &group {
                nodes.push(StageNode::new(stage, display_name(stage), previous.clone()));
            }
            previous = group;
        }
        Self::new(nodes)
    }

    /// Kahn's algorithm; each round of zero in-degree stages is one parallel group
    fn topological_sort(stages: &HashMap<StageId, StageNode>) -> Result<Vec<Vec<StageId>>> {
        let mut in_degree: HashMap<StageId, usize> = stages
            .values()
            .map(|stage| {
                let distinct: BTreeSet<_> = stage.dependencies.iter().collect();
                (stage.id, distinct.len())
            })
            .collect();

        let mut result = Vec::new();
        while !in_degree.is_empty() {
            let mut ready: Vec<StageId> = in_degree
                .iter()
                .filter(|(_, &degree)| degree == 0)
                .map(|(&id, _)| id)
                .collect();

            if ready.is_empty() {
                return Err(OrchestratorError::DagCycleDetected);
            }
            ready.sort();

            for stage_id in &ready {
                in_degree.remove(stage_id);
                for dependent in stages.values() {
                    if dependent.dependencies.contains(stage_id) {
                        if let Some(degree) = in_degree.get_mut(&dependent.id) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }
            result.push(ready);
        }

        Ok(result)
    }

    pub fn execution_order(&self) -> &[Vec<StageId>] {
        &self.execution_order
    }

    pub fn get_stage(&self, id: StageId) -> Option<&StageNode> {
        self.stages.get(&id)
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.execution_order.iter().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Get execution plan as string (for logging)
    pub fn execution_plan(&self) -> String {
        self.execution_order
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let names: Vec<_> = group.iter().map(|id| self.stages[id].name).collect();
                if group.len() > 1 {
                    format!("Phase {}: {} (parallel)", i + 1, names.join(" ∥ "))
                } else {
                    format!("Phase {}: {}", i + 1, names.join(""))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
