//! WorkflowPlanner — selects a topology and builds the step graph.

use std::collections::HashMap;

use crate::analyzer::{TaskRequirements, Urgency};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::models::worker::Capability;

use super::schema::{
    FallbackPolicy, RuleKind, ValidationRule, WorkflowDefinition, WorkflowStep, WorkflowType,
};

pub struct WorkflowPlanner {
    config: EngineConfig,
}

impl WorkflowPlanner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn plan(&self, requirements: &TaskRequirements) -> Result<WorkflowDefinition, CoreError> {
        let workflow_type = self.select_type(requirements);
        let steps = self.build_steps(requirements);

        let definition = WorkflowDefinition {
            workflow_type,
            steps,
            fallback: FallbackPolicy {
                max_retries: self.config.max_retries,
                alternates: HashMap::new(),
            },
        };
        definition.validate()?;

        tracing::info!(
            "[Planner] {} workflow with {} steps (complexity={}, topics={})",
            workflow_type.as_str(),
            definition.steps.len(),
            requirements.complexity,
            requirements.distinct_topics().len()
        );
        Ok(definition)
    }

    /// Ordered criteria, first match wins.
    pub fn select_type(&self, requirements: &TaskRequirements) -> WorkflowType {
        if requirements.complexity > self.config.collaborative_complexity_threshold {
            return WorkflowType::Collaborative;
        }
        if requirements.distinct_topics().len() > self.config.parallel_topic_threshold {
            return WorkflowType::Parallel;
        }
        if requirements.urgency == Urgency::High {
            return WorkflowType::Expedited;
        }
        WorkflowType::Sequential
    }

    fn build_steps(&self, requirements: &TaskRequirements) -> Vec<WorkflowStep> {
        let mut steps = Vec::new();

        steps.push(WorkflowStep {
            id: "understanding".to_string(),
            description: "Build a shared understanding of the request and restate its goal"
                .to_string(),
            required_capabilities: ["analysis"].into_iter().collect(),
            required_inputs: Vec::new(),
            validation: vec![ValidationRule::new(
                RuleKind::Completeness,
                "must include summary",
            )],
            output_format: None,
        });

        steps.push(WorkflowStep {
            id: "planning".to_string(),
            description: "Lay out an approach covering every identified topic".to_string(),
            required_capabilities: ["planning"].into_iter().collect(),
            required_inputs: vec!["understanding".to_string()],
            validation: vec![ValidationRule::new(RuleKind::Coherence, "must include plan")],
            output_format: None,
        });

        let topics = requirements.distinct_topics();
        let mut topic_ids = Vec::with_capacity(topics.len());
        for topic in &topics {
            let id = format!("topic_{}", slug(&topic.name));
            let mut capabilities = if topic.required_capabilities.is_empty() {
                requirements.required_capabilities.clone()
            } else {
                topic.required_capabilities.clone()
            };
            capabilities.insert(Capability::topic_expertise());

            steps.push(WorkflowStep {
                id: id.clone(),
                description: if topic.description.is_empty() {
                    format!("Work the '{}' topic of the request", topic.name)
                } else {
                    topic.description.clone()
                },
                required_capabilities: capabilities,
                required_inputs: vec!["planning".to_string()],
                validation: vec![ValidationRule::new(RuleKind::Relevance, "")],
                output_format: None,
            });
            topic_ids.push(id);
        }

        if topic_ids.len() > 1 {
            steps.push(WorkflowStep {
                id: "integration".to_string(),
                description: "Reconcile the topic outputs into one coherent answer".to_string(),
                required_capabilities: ["synthesis"].into_iter().collect(),
                required_inputs: topic_ids.clone(),
                validation: vec![ValidationRule::new(RuleKind::Consistency, "")],
                output_format: None,
            });
        }

        let prior: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
        steps.push(WorkflowStep {
            id: "quality_check".to_string(),
            description: "Review all prior outputs for gaps and contradictions".to_string(),
            required_capabilities: ["review"].into_iter().collect(),
            required_inputs: prior,
            validation: vec![ValidationRule::new(RuleKind::Completeness, "")],
            output_format: None,
        });

        steps
    }
}

fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::TaskComponent;

    fn requirements(complexity: u8, topics: usize, urgency: Urgency) -> TaskRequirements {
        TaskRequirements {
            requires_delegation: true,
            task_type: "research".into(),
            priority: 3,
            complexity,
            required_capabilities: ["research"].into_iter().collect(),
            subtasks: Vec::new(),
            components: (0..topics)
                .map(|i| TaskComponent {
                    name: format!("topic {}", i),
                    description: String::new(),
                    required_capabilities: ["research"].into_iter().collect(),
                })
                .collect(),
            urgency,
        }
    }

    fn planner() -> WorkflowPlanner {
        WorkflowPlanner::new(EngineConfig::default())
    }

    #[test]
    fn test_type_selection_order() {
        let p = planner();
        assert_eq!(
            p.select_type(&requirements(5, 0, Urgency::Normal)),
            WorkflowType::Collaborative
        );
        assert_eq!(
            p.select_type(&requirements(2, 4, Urgency::Normal)),
            WorkflowType::Parallel
        );
        assert_eq!(
            p.select_type(&requirements(1, 0, Urgency::High)),
            WorkflowType::Expedited
        );
        assert_eq!(
            p.select_type(&requirements(3, 2, Urgency::Normal)),
            WorkflowType::Sequential
        );
        // Complexity dominates even when other criteria also match.
        assert_eq!(
            p.select_type(&requirements(5, 4, Urgency::High)),
            WorkflowType::Collaborative
        );
    }

    #[test]
    fn test_single_topic_plan_has_no_integration() {
        let definition = planner().plan(&requirements(2, 1, Urgency::Normal)).unwrap();
        let ids: Vec<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["understanding", "planning", "topic_topic_0", "quality_check"]);
    }

    #[test]
    fn test_multi_topic_plan_integrates_before_quality_check() {
        let definition = planner().plan(&requirements(2, 2, Urgency::Normal)).unwrap();
        let ids: Vec<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "understanding",
                "planning",
                "topic_topic_0",
                "topic_topic_1",
                "integration",
                "quality_check"
            ]
        );

        let integration = definition.step("integration").unwrap();
        assert_eq!(
            integration.required_inputs,
            vec!["topic_topic_0", "topic_topic_1"]
        );

        let quality = definition.step("quality_check").unwrap();
        assert_eq!(quality.required_inputs.len(), 5);
    }

    #[test]
    fn test_topic_steps_carry_topic_expertise() {
        let definition = planner().plan(&requirements(2, 1, Urgency::Normal)).unwrap();
        let topic = definition.step("topic_topic_0").unwrap();
        assert!(topic
            .required_capabilities
            .contains(&Capability::topic_expertise()));
        assert!(topic
            .required_capabilities
            .contains(&Capability::new("research")));
    }

    #[test]
    fn test_zero_topic_plan_is_understanding_planning_quality() {
        let definition = planner().plan(&requirements(2, 0, Urgency::Normal)).unwrap();
        let ids: Vec<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["understanding", "planning", "quality_check"]);
    }

    #[test]
    fn test_planner_honors_configured_thresholds() {
        let config = EngineConfig {
            collaborative_complexity_threshold: 2,
            ..EngineConfig::default()
        };
        let p = WorkflowPlanner::new(config);
        assert_eq!(
            p.select_type(&requirements(3, 0, Urgency::Normal)),
            WorkflowType::Collaborative
        );
    }
}
