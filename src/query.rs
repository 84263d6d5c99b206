//! Free-text search grammar.
//!
//! One input string carries both structured predicates (`status:done`,
//! `owner:anna`, `has:files`, `weight>0.5`) and a residual plain-text term.
//! A small explicit lexer strips the tokens; whatever remains matches as a
//! case-insensitive substring of a caller-supplied haystack. The parser only
//! extracts raw values; resolving `owner`/`assignee` names against the PM
//! directory is the caller's job.

use crate::types::{Pm, Project, ProjectStatus, Step, Subtask, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightOp {
    Gt,
    Lt,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightFilter {
    pub op: WeightOp,
    pub threshold: f64,
}

impl WeightFilter {
    pub fn matches(&self, weight: f64) -> bool {
        match self.op {
            WeightOp::Gt => weight > self.threshold,
            WeightOp::Lt => weight < self.threshold,
            WeightOp::Eq => weight == self.threshold,
        }
    }
}

/// Structured form of one search input. Every token key is consumed from the
/// text; an absent predicate is vacuously true. AND semantics throughout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    /// Residual plain text, trimmed, interior whitespace collapsed.
    pub text: String,
    /// Raw value of `status:` (exact, case-insensitive match downstream).
    pub status: Option<String>,
    /// Raw value of `owner:`, not resolved here.
    pub owner: Option<String>,
    /// Raw value of `assignee:`, not resolved here.
    pub assignee: Option<String>,
    /// `has:files` was present.
    pub has_files: bool,
    pub weight: Option<WeightFilter>,
}

impl ParsedQuery {
    pub fn parse(input: &str) -> Self {
        let mut query = ParsedQuery::default();
        let mut residual: Vec<&str> = Vec::new();

        for word in input.split_whitespace() {
            if let Some((key, value)) = split_token(word) {
                query.apply_token(&key, value);
            } else if let Some(filter) = parse_bare_weight(word) {
                query.weight = Some(filter);
            } else {
                residual.push(word);
            }
        }

        query.text = residual.join(" ");
        query
    }

    pub fn is_empty(&self) -> bool {
        *self == ParsedQuery::default()
    }

    fn apply_token(&mut self, key: &str, value: &str) {
        match key.to_lowercase().as_str() {
            "status" => self.status = Some(value.to_string()),
            "owner" => self.owner = Some(value.to_string()),
            "assignee" => self.assignee = Some(value.to_string()),
            "has" => {
                if value.eq_ignore_ascii_case("files") {
                    self.has_files = true;
                }
            }
            "weight" => self.weight = parse_weight_value(value),
            // recognized as a token, produces nothing
            _ => {}
        }
    }

    /// Case-insensitive substring match of the residual term. Vacuously true
    /// when no residual text remains.
    pub fn matches_text(&self, haystack: &str) -> bool {
        if self.text.is_empty() {
            return true;
        }
        haystack.to_lowercase().contains(&self.text.to_lowercase())
    }

    pub fn matches_task_status(&self, status: TaskStatus) -> bool {
        match &self.status {
            Some(wanted) => wanted.eq_ignore_ascii_case(status.as_str()),
            None => true,
        }
    }

    pub fn matches_project_status(&self, status: ProjectStatus) -> bool {
        match &self.status {
            Some(wanted) => wanted.eq_ignore_ascii_case(status.as_str()),
            None => true,
        }
    }

    pub fn matches_weight(&self, weight: f64) -> bool {
        match &self.weight {
            Some(filter) => filter.matches(weight),
            None => true,
        }
    }
}

/// `key:value` where the key is an unbroken run of word characters and the
/// value is the non-whitespace remainder. Empty keys or values do not form a
/// token and stay in the residual text.
fn split_token(word: &str) -> Option<(String, &str)> {
    let (key, value) = word.split_once(':')?;
    if key.is_empty() || value.is_empty() {
        return None;
    }
    if !key.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
        return None;
    }
    Some((key.to_string(), value))
}

fn parse_weight_value(value: &str) -> Option<WeightFilter> {
    let mut chars = value.chars();
    let op = match chars.next()? {
        '>' => WeightOp::Gt,
        '<' => WeightOp::Lt,
        '=' => WeightOp::Eq,
        _ => return None,
    };
    let threshold: f64 = chars.as_str().trim().parse().ok()?;
    if !threshold.is_finite() {
        return None;
    }
    Some(WeightFilter { op, threshold })
}

/// Comparator shorthand without the colon: `weight>0.5`, `weight<2`,
/// `weight=1`.
fn parse_bare_weight(word: &str) -> Option<WeightFilter> {
    let rest = strip_prefix_ignore_ascii_case(word, "weight")?;
    let filter = parse_weight_value(rest)?;
    Some(filter)
}

fn strip_prefix_ignore_ascii_case<'a>(word: &'a str, prefix: &str) -> Option<&'a str> {
    let head = word.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        word.get(prefix.len()..)
    } else {
        None
    }
}

/// Case-insensitive PM directory lookup for `owner:`/`assignee:` values.
pub fn resolve_pm<'a>(pms: &'a [Pm], name: &str) -> Option<&'a Pm> {
    let wanted = name.trim().to_lowercase();
    pms.iter().find(|pm| pm.name.to_lowercase() == wanted)
}

/// Projects filter: residual text against name + code + status, plus the
/// status and owner predicates and `has:files`. `owner_id` is the id the
/// caller resolved for `query.owner`; an unresolvable owner matches nothing.
pub fn filter_projects<'a>(
    projects: &'a [Project],
    query: &ParsedQuery,
    owner_id: Option<i64>,
) -> Vec<&'a Project> {
    projects
        .iter()
        .filter(|project| {
            let haystack = format!(
                "{} {} {}",
                project.name,
                project.code.as_deref().unwrap_or_default(),
                project.status.as_str()
            );
            query.matches_text(&haystack)
                && query.matches_project_status(project.status)
                && matches_reference(query.owner.as_deref(), owner_id, project.owner_id)
                && (!query.has_files || !project.attachments.is_empty())
        })
        .collect()
}

/// Steps filter: residual text against name + description, plus status,
/// assignee, `has:files`, and the weight comparator.
pub fn filter_steps<'a>(
    steps: &'a [Step],
    query: &ParsedQuery,
    assignee_id: Option<i64>,
) -> Vec<&'a Step> {
    steps
        .iter()
        .filter(|step| {
            let haystack = format!(
                "{} {}",
                step.name,
                step.description.as_deref().unwrap_or_default()
            );
            query.matches_text(&haystack)
                && query.matches_task_status(step.status)
                && matches_reference(query.assignee.as_deref(), assignee_id, step.assignee_id)
                && (!query.has_files || !step.attachments.is_empty())
                && query.matches_weight(step.weight)
        })
        .collect()
}

/// Subtasks filter: residual text against name + comment, plus status,
/// assignee, and weight. Subtasks carry no attachments, so `has:files` does
/// not apply at this level.
pub fn filter_subtasks<'a>(
    subtasks: &'a [Subtask],
    query: &ParsedQuery,
    assignee_id: Option<i64>,
) -> Vec<&'a Subtask> {
    subtasks
        .iter()
        .filter(|subtask| {
            let haystack = format!(
                "{} {}",
                subtask.name,
                subtask.comment.as_deref().unwrap_or_default()
            );
            query.matches_text(&haystack)
                && query.matches_task_status(subtask.status)
                && matches_reference(query.assignee.as_deref(), assignee_id, subtask.assignee_id)
                && query.matches_weight(subtask.weight)
        })
        .collect()
}

fn matches_reference(raw: Option<&str>, resolved: Option<i64>, actual: Option<i64>) -> bool {
    match raw {
        None => true,
        Some(_) => match resolved {
            Some(id) => actual == Some(id),
            None => false,
        },
    }
}
