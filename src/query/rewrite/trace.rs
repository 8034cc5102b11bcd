// Rewrite Trace
//
// Per-query record of what happened to every view considered: the verdict of
// each stage it reached, its cost when it got that far, and whether it won.
// Its Display form is the "explain rewrite" text.

use std::fmt;

use linked_hash_map::LinkedHashMap;
use serde::Serialize;

/// Outcome of one pipeline stage for one view
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub enum StageVerdict {
    #[default]
    NotReached,
    Passed,
    PassedWithNote(String),
    Rejected(String),
}

impl StageVerdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, StageVerdict::Rejected(_))
    }
}

impl fmt::Display for StageVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageVerdict::NotReached => write!(f, "-"),
            StageVerdict::Passed => write!(f, "ok"),
            StageVerdict::PassedWithNote(note) => write!(f, "ok ({})", note),
            StageVerdict::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewTrace {
    pub structural: StageVerdict,
    /// Aggregate compatibility, or output derivation for non-aggregate views
    pub compatibility: StageVerdict,
    pub freshness: StageVerdict,
    pub cost: Option<f64>,
    pub chosen: bool,
}

/// Views in the order they were considered
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewriteTrace {
    views: LinkedHashMap<String, ViewTrace>,
    chosen: Option<String>,
}

impl RewriteTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `view`, created on first use
    pub fn view_mut(&mut self, view: &str) -> &mut ViewTrace {
        self.views.entry(view.to_string()).or_insert_with(ViewTrace::default)
    }

    pub fn view(&self, view: &str) -> Option<&ViewTrace> {
        self.views.get(view)
    }

    pub fn views(&self) -> impl Iterator<Item = (&String, &ViewTrace)> {
        self.views.iter()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn chosen(&self) -> Option<&str> {
        self.chosen.as_deref()
    }

    pub fn set_chosen(&mut self, view: &str) {
        self.view_mut(view).chosen = true;
        self.chosen = Some(view.to_string());
    }
}

impl fmt::Display for RewriteTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.views.is_empty() {
            return writeln!(f, "no materialized views considered");
        }
        for (name, view) in self.views.iter() {
            let marker = if view.chosen { "*" } else { " " };
            writeln!(f, "{} {}", marker, name)?;
            writeln!(f, "    structural:    {}", view.structural)?;
            writeln!(f, "    compatibility: {}", view.compatibility)?;
            writeln!(f, "    freshness:     {}", view.freshness)?;
            if let Some(cost) = view.cost {
                writeln!(f, "    cost:          {:.1}", cost)?;
            }
        }
        match &self.chosen {
            Some(name) => writeln!(f, "chosen: {}", name),
            None => writeln!(f, "chosen: none"),
        }
    }
}
