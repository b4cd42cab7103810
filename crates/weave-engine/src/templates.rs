use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use weave_core::config::TemplateConfig;
use weave_core::error::{Result, WeaveError};
use weave_core::types::{TaskSpec, TaskType};

use crate::graph::dag;

/// Name of the single-task fallback template.
pub const GENERAL_TEMPLATE: &str = "general";

/// Minimum keyword overlap for `suggest` to pick a specialised template.
const MIN_SUGGEST_SCORE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Complexity {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(WeaveError::Validation(format!(
                "unknown complexity '{}'",
                other
            ))),
        }
    }
}

/// One task slot in a template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateTask {
    pub id: String,
    pub spec: TaskSpec,
    pub depends_on: Vec<String>,
}

/// A reusable named DAG shape. Immutable once registered.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub description: String,
    pub tasks: Vec<TemplateTask>,
    pub estimated_duration_secs: u64,
    pub complexity: Complexity,
    pub keywords: BTreeSet<String>,
    /// Wins keyword-score ties in `suggest`.
    #[serde(skip)]
    pub default_general: bool,
}

/// Wire shape of a template for the detail endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDetail {
    pub name: String,
    pub description: String,
    pub task_types: Vec<String>,
    pub task_sequence: Vec<String>,
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub estimated_duration: u64,
    pub required_capabilities: BTreeMap<String, Vec<String>>,
    pub complexity: Complexity,
}

impl WorkflowTemplate {
    /// Check that task ids are unique and the dependency graph is a DAG.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.name.trim().is_empty() {
            return Err(WeaveError::Validation("template name must not be empty".into()));
        }
        if self.tasks.is_empty() {
            return Err(WeaveError::Validation(format!(
                "template '{}' has no tasks",
                self.name
            )));
        }
        dag::topological_order(&self.edges())
    }

    fn edges(&self) -> Vec<(String, Vec<String>)> {
        self.tasks
            .iter()
            .map(|t| (t.id.clone(), t.depends_on.clone()))
            .collect()
    }

    /// Task ids in topological order.
    pub fn task_sequence(&self) -> Vec<String> {
        dag::topological_order(&self.edges())
            .unwrap_or_else(|_| self.tasks.iter().map(|t| t.id.clone()).collect())
    }

    pub fn detail(&self) -> TemplateDetail {
        TemplateDetail {
            name: self.name.clone(),
            description: self.description.clone(),
            task_types: self
                .tasks
                .iter()
                .map(|t| t.spec.task_type.to_string())
                .collect(),
            task_sequence: self.task_sequence(),
            dependencies: self
                .tasks
                .iter()
                .map(|t| (t.id.clone(), t.depends_on.clone()))
                .collect(),
            estimated_duration: self.estimated_duration_secs,
            required_capabilities: self
                .tasks
                .iter()
                .map(|t| (t.id.clone(), t.spec.capabilities.iter().cloned().collect()))
                .collect(),
            complexity: self.complexity,
        }
    }

    /// Number of distinct prompt tokens that are keywords of this template.
    fn score(&self, tokens: &HashSet<String>) -> usize {
        tokens.iter().filter(|t| self.keywords.contains(*t)).count()
    }

    fn from_config(cfg: &TemplateConfig) -> Result<Self> {
        let tasks = cfg
            .tasks
            .iter()
            .map(|t| {
                let task_type = TaskType::from(t.task_type.as_str());
                let mut spec = builtin_spec(&task_type);
                if !t.capabilities.is_empty() {
                    spec = spec.with_capabilities(t.capabilities.iter().cloned());
                }
                if let Some(role) = &t.role {
                    spec = spec.with_role(role.clone());
                }
                TemplateTask {
                    id: t.id.clone().unwrap_or_else(|| task_type.to_string()),
                    spec,
                    depends_on: t.depends_on.clone(),
                }
            })
            .collect();

        Ok(Self {
            name: cfg.name.clone(),
            description: cfg.description.clone(),
            tasks,
            estimated_duration_secs: cfg.estimated_duration_secs,
            complexity: cfg.complexity.parse()?,
            keywords: cfg.keywords.iter().map(|k| k.to_lowercase()).collect(),
            default_general: false,
        })
    }
}

/// Capabilities and role description for a task type.
pub fn builtin_spec(task_type: &TaskType) -> TaskSpec {
    let (caps, role): (&[&str], &str) = match task_type.as_str() {
        "research" => (
            &["research", "search"],
            "You are a research specialist. Gather the relevant facts, sources, and context.",
        ),
        "reasoning" => (
            &["reasoning"],
            "You are an analytical reasoner. Work through the problem step by step and draw conclusions.",
        ),
        "coding" => (
            &["coding"],
            "You are a software engineer. Produce correct, well-structured code.",
        ),
        "creative" => (
            &["creative", "writing"],
            "You are a creative writer. Produce original, engaging content.",
        ),
        "summary" => (
            &["summarization", "writing"],
            "You are an editor. Summarize the findings clearly and concisely.",
        ),
        "review" => (
            &["review", "reasoning"],
            "You are a careful reviewer. Check the work for errors and suggest improvements.",
        ),
        "documentation" => (
            &["documentation", "writing"],
            "You are a technical writer. Document the result for its intended audience.",
        ),
        "general" => (&["general"], "You are a helpful assistant."),
        other => {
            return TaskSpec::new(task_type.clone()).with_capabilities([other.to_string()]);
        }
    };
    TaskSpec::new(task_type.clone())
        .with_capabilities(caps.iter().copied())
        .with_role(role)
}

fn task(id: &str, task_type: TaskType, depends_on: &[&str]) -> TemplateTask {
    TemplateTask {
        id: id.to_string(),
        spec: builtin_spec(&task_type),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
    }
}

fn custom(name: &str) -> TaskType {
    TaskType::Custom(name.to_string())
}

fn keywords(words: &[&str]) -> BTreeSet<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate {
            name: GENERAL_TEMPLATE.into(),
            description: "Single general-purpose task".into(),
            tasks: vec![task("general", TaskType::General, &[])],
            estimated_duration_secs: 30,
            complexity: Complexity::Low,
            keywords: keywords(&["help", "question", "explain", "answer", "tell", "general"]),
            default_general: true,
        },
        WorkflowTemplate {
            name: "research_analysis".into(),
            description: "Research a topic, reason over the findings, and summarize".into(),
            tasks: vec![
                task("research", TaskType::Research, &[]),
                task("reasoning", TaskType::Reasoning, &["research"]),
                task("summary", custom("summary"), &["reasoning"]),
            ],
            estimated_duration_secs: 120,
            complexity: Complexity::Medium,
            keywords: keywords(&[
                "research", "analyze", "analysis", "study", "investigate", "findings", "data",
                "trends", "report", "survey", "evidence", "insights", "market",
            ]),
            default_general: false,
        },
        WorkflowTemplate {
            name: "code_development".into(),
            description: "Research, implement, review, and document code".into(),
            tasks: vec![
                task("research", TaskType::Research, &[]),
                task("coding", TaskType::Coding, &["research"]),
                task("review", custom("review"), &["coding"]),
                task("documentation", custom("documentation"), &["review"]),
            ],
            estimated_duration_secs: 300,
            complexity: Complexity::High,
            keywords: keywords(&[
                "code", "implement", "function", "program", "api", "bug", "refactor", "build",
                "develop", "software", "library", "app", "script", "rust", "python", "service",
            ]),
            default_general: false,
        },
        WorkflowTemplate {
            name: "creative_writing".into(),
            description: "Research background, write creatively, and review".into(),
            tasks: vec![
                task("research", TaskType::Research, &[]),
                task("creative", TaskType::Creative, &["research"]),
                task("review", custom("review"), &["creative"]),
            ],
            estimated_duration_secs: 180,
            complexity: Complexity::Medium,
            keywords: keywords(&[
                "story", "poem", "creative", "write", "novel", "fiction", "narrative",
                "character", "lyrics", "essay", "blog",
            ]),
            default_general: false,
        },
        WorkflowTemplate {
            name: "problem_solving".into(),
            description: "Research, reason, implement a solution, and summarize".into(),
            tasks: vec![
                task("research", TaskType::Research, &[]),
                task("reasoning", TaskType::Reasoning, &["research"]),
                task("coding", TaskType::Coding, &["reasoning"]),
                task("summary", custom("summary"), &["coding"]),
            ],
            estimated_duration_secs: 240,
            complexity: Complexity::High,
            keywords: keywords(&[
                "solve", "problem", "optimize", "algorithm", "calculate", "puzzle", "logic",
                "prove", "strategy", "equation",
            ]),
            default_general: false,
        },
        WorkflowTemplate {
            name: "comparative_research".into(),
            description: "Research two sides independently, then compare and summarize".into(),
            tasks: vec![
                task("research_primary", TaskType::Research, &[]),
                task("research_alternatives", TaskType::Research, &[]),
                task(
                    "reasoning",
                    TaskType::Reasoning,
                    &["research_primary", "research_alternatives"],
                ),
                task("summary", custom("summary"), &["reasoning"]),
            ],
            estimated_duration_secs: 150,
            complexity: Complexity::Medium,
            keywords: keywords(&[
                "compare", "comparison", "versus", "vs", "difference", "differences",
                "alternatives", "tradeoffs", "pros", "cons", "contrast",
            ]),
            default_general: false,
        },
    ]
}

/// Lowercase alphanumeric tokens of a prompt.
pub fn tokenize(text: &str) -> HashSet<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"[a-z0-9_]+").expect("static regex"));
    let lower = text.to_lowercase();
    word.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

/// Static catalogue of workflow templates, in declaration order.
pub struct TemplateRegistry {
    templates: Vec<WorkflowTemplate>,
}

impl TemplateRegistry {
    /// Registry holding only the built-in templates.
    pub fn new() -> Self {
        Self {
            templates: builtin_templates(),
        }
    }

    /// Built-ins plus every `[[templates]]` entry from config.
    pub fn from_config(configs: &[TemplateConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for cfg in configs {
            registry.register(WorkflowTemplate::from_config(cfg)?)?;
        }
        Ok(registry)
    }

    /// Add a template after validating it.
    pub fn register(&mut self, template: WorkflowTemplate) -> Result<()> {
        template.validate()?;
        if self.templates.iter().any(|t| t.name == template.name) {
            return Err(WeaveError::Validation(format!(
                "template '{}' already exists",
                template.name
            )));
        }
        self.templates.push(template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&WorkflowTemplate> {
        self.templates
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| WeaveError::TemplateNotFound(name.to_string()))
    }

    /// Name → description, ordered by name.
    pub fn list(&self) -> BTreeMap<String, String> {
        self.templates
            .iter()
            .map(|t| (t.name.clone(), t.description.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template the fallback and tie-breaking rules resolve to.
    pub fn default_general(&self) -> &WorkflowTemplate {
        self.templates
            .iter()
            .find(|t| t.default_general)
            .unwrap_or(&self.templates[0])
    }

    /// Best-matching template for a prompt by keyword overlap.
    ///
    /// Highest score wins; on a tie the default-general template wins if it
    /// is among the leaders, otherwise the earliest-declared leader does.
    /// Below `MIN_SUGGEST_SCORE` the default-general template is returned.
    pub fn suggest(&self, prompt: &str) -> &str {
        let tokens = tokenize(prompt);
        let scored: Vec<(&WorkflowTemplate, usize)> = self
            .templates
            .iter()
            .map(|t| (t, t.score(&tokens)))
            .collect();

        let best = scored.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if best < MIN_SUGGEST_SCORE {
            return &self.default_general().name;
        }

        let leaders: Vec<&WorkflowTemplate> = scored
            .iter()
            .filter(|(_, s)| *s == best)
            .map(|(t, _)| *t)
            .collect();
        leaders
            .iter()
            .find(|t| t.default_general)
            .or_else(|| leaders.first())
            .map(|t| t.name.as_str())
            .unwrap_or(GENERAL_TEMPLATE)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
