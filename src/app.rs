//! Session presenter: the actions of the checkbox-tree front end.
//!
//! A [`Session`] owns the loaded journals and their [`SelectionModel`] and
//! exposes exactly what the window offers: open, add, remove, move up/down,
//! select all/none, toggle, and "Generate PDF". Outcomes that the window
//! would show in a message box come back as [`Dialog`] values, so any
//! front end (the CLI, a GUI toolkit, a test) can present them its own way.
//! A failed action leaves the session as it was.

use crate::config::ExportConfig;
use crate::convert;
use crate::error::{ConversionWarning, Journal2PdfError};
use crate::model::JournalEntry;
use crate::output::RenderOutput;
use crate::pipeline::input::ExportBundle;
use crate::selection::{CheckState, NodeId, SelectionModel, SelectionObserver};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ── Dialogs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    Info,
    Warning,
    Error,
}

/// A message box the front end should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dialog {
    pub kind: DialogKind,
    pub title: String,
    pub message: String,
    /// Extra lines, e.g. one per warning.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl Dialog {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DialogKind::Info,
            title: title.into(),
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn error(title: impl Into<String>, err: &Journal2PdfError) -> Self {
        Self {
            kind: DialogKind::Error,
            title: title.into(),
            message: err.to_string(),
            details: Vec::new(),
        }
    }

    fn with_warnings(mut self, warnings: &[ConversionWarning]) -> Self {
        if !warnings.is_empty() {
            if self.kind == DialogKind::Info {
                self.kind = DialogKind::Warning;
            }
            self.details = warnings.iter().map(|w| w.to_string()).collect();
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == DialogKind::Error
    }
}

// ── Tree rows ────────────────────────────────────────────────────────────

/// One visible row of the checkbox tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeRow {
    pub id: NodeId,
    /// 0 for journals, 1 for pages, 2 for headings.
    pub depth: usize,
    pub label: String,
    pub state: CheckState,
    /// Label path accepted by [`Session::toggle_path`].
    pub path: String,
}

impl TreeRow {
    /// `[x]`, `[ ]` or `[-]`.
    pub fn mark(&self) -> &'static str {
        match self.state {
            CheckState::Checked => "[x]",
            CheckState::Unchecked => "[ ]",
            CheckState::Partial => "[-]",
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────

/// Loaded journals plus their inclusion flags.
pub struct Session {
    config: ExportConfig,
    journals: Vec<JournalEntry>,
    selection: SelectionModel,
    /// Export folder names, one per opened or added export.
    export_titles: Vec<Option<String>>,
    sources: Vec<PathBuf>,
    /// Index into `sources` of the export each journal came from.
    origins: Vec<usize>,
    warnings: Vec<ConversionWarning>,
    observers: Vec<Arc<dyn SelectionObserver>>,
    last_render: Option<RenderOutput>,
}

impl Session {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            journals: Vec::new(),
            selection: SelectionModel::default(),
            export_titles: Vec::new(),
            sources: Vec::new(),
            origins: Vec::new(),
            warnings: Vec::new(),
            observers: Vec::new(),
            last_render: None,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ExportConfig) {
        self.config = config;
    }

    pub fn journals(&self) -> &[JournalEntry] {
        &self.journals
    }

    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Warnings from every export read so far.
    pub fn warnings(&self) -> &[ConversionWarning] {
        &self.warnings
    }

    /// Output of the most recent successful generate.
    pub fn last_render(&self) -> Option<&RenderOutput> {
        self.last_render.as_ref()
    }

    /// Export name used for the cover; only meaningful with one export.
    pub fn export_title(&self) -> Option<&str> {
        match self.export_titles.as_slice() {
            [only] => only.as_deref(),
            _ => None,
        }
    }

    /// Attach an observer to the current and every future selection tree.
    pub fn subscribe(&mut self, observer: Arc<dyn SelectionObserver>) {
        self.selection.subscribe(Arc::clone(&observer));
        self.observers.push(observer);
    }

    // ── File actions ─────────────────────────────────────────────────────

    /// "Open…": replace everything with the journals of `path`.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<usize, Dialog> {
        let bundle = convert::open_export(path.as_ref()).map_err(|e| {
            error!("Open failed: {e}");
            Dialog::error("Could not open export", &e)
        })?;
        Ok(self.open_bundle(bundle))
    }

    /// "Add…": append the journals of `path` after the loaded ones.
    pub fn add(&mut self, path: impl AsRef<Path>) -> Result<usize, Dialog> {
        let bundle = convert::open_export(path.as_ref()).map_err(|e| {
            error!("Add failed: {e}");
            Dialog::error("Could not add export", &e)
        })?;
        Ok(self.add_bundle(bundle))
    }

    /// Replace the session contents with an already read export.
    pub fn open_bundle(&mut self, bundle: ExportBundle) -> usize {
        self.journals.clear();
        self.export_titles.clear();
        self.sources.clear();
        self.origins.clear();
        self.warnings.clear();
        self.selection = SelectionModel::default();
        for observer in &self.observers {
            self.selection.subscribe(Arc::clone(observer));
        }
        self.add_bundle(bundle)
    }

    /// Append an already read export. Journal titles that clash with a
    /// loaded journal get a ` (2)`, ` (3)`, … suffix.
    pub fn add_bundle(&mut self, bundle: ExportBundle) -> usize {
        let added = bundle.journals.len();
        let export = self.sources.len();
        for mut journal in bundle.journals {
            journal.title = self.unique_title(&journal.title);
            self.selection.append(&journal);
            self.journals.push(journal);
            self.origins.push(export);
        }
        info!(
            "Loaded {} journal(s) from {} ({} total)",
            added,
            bundle.source.display(),
            self.journals.len()
        );
        self.export_titles.push(bundle.title);
        self.sources.push(bundle.source);
        self.warnings.extend(bundle.warnings);
        added
    }

    fn unique_title(&self, title: &str) -> String {
        let taken = |t: &str| self.journals.iter().any(|j| j.title == t);
        if !taken(title) {
            return title.to_string();
        }
        (2..)
            .map(|n| format!("{title} ({n})"))
            .find(|t| !taken(t))
            .unwrap_or_else(|| title.to_string())
    }

    // ── List actions ─────────────────────────────────────────────────────

    /// "Remove": drop the journal at `index`.
    pub fn remove_journal(&mut self, index: usize) -> Result<(), Dialog> {
        self.selection
            .remove_root(index)
            .map_err(|e| Dialog::error("Cannot remove journal", &e))?;
        let removed = self.journals.remove(index);
        info!("Removed journal '{}'", removed.title);

        let export = self.origins.remove(index);
        if !self.origins.contains(&export) {
            debug!("Journal '{}' was the last of its export", removed.title);
            self.export_titles.remove(export);
            self.sources.remove(export);
            for o in self.origins.iter_mut().filter(|o| **o > export) {
                *o -= 1;
            }
        }
        Ok(())
    }

    /// "Move up". Moving the first journal up is a no-op.
    pub fn move_up(&mut self, index: usize) -> Result<(), Dialog> {
        if index == 0 {
            return self.check_index(index);
        }
        self.move_journal(index, index - 1)
    }

    /// "Move down". Moving the last journal down is a no-op.
    pub fn move_down(&mut self, index: usize) -> Result<(), Dialog> {
        if index + 1 >= self.journals.len() {
            return self.check_index(index);
        }
        self.move_journal(index, index + 1)
    }

    fn check_index(&self, index: usize) -> Result<(), Dialog> {
        if index < self.journals.len() {
            return Ok(());
        }
        let err = Journal2PdfError::UnknownSelection {
            path: format!("journal #{}", index + 1),
        };
        Err(Dialog::error("Cannot move journal", &err))
    }

    fn move_journal(&mut self, from: usize, to: usize) -> Result<(), Dialog> {
        self.selection
            .move_root(from, to)
            .map_err(|e| Dialog::error("Cannot move journal", &e))?;
        let journal = self.journals.remove(from);
        self.journals.insert(to, journal);
        let origin = self.origins.remove(from);
        self.origins.insert(to, origin);
        Ok(())
    }

    // ── Selection actions ────────────────────────────────────────────────

    pub fn select_all(&mut self) {
        self.selection.set_all(true);
    }

    pub fn select_none(&mut self) {
        self.selection.set_all(false);
    }

    /// Click on a checkbox.
    pub fn toggle(&mut self, id: NodeId, included: bool) -> Result<(), Dialog> {
        self.selection
            .toggle(id, included)
            .map(|_| ())
            .map_err(|e| Dialog::error("Cannot change selection", &e))
    }

    /// Toggle by `Journal/Page/Heading` label path.
    pub fn toggle_path(&mut self, path: &str, included: bool) -> Result<(), Dialog> {
        self.selection
            .toggle_path(path, included)
            .map(|_| ())
            .map_err(|e| Dialog::error("Cannot change selection", &e))
    }

    /// The checkbox tree, depth-first.
    pub fn tree_rows(&self) -> Vec<TreeRow> {
        let mut rows = Vec::with_capacity(self.selection.len());
        let mut stack: Vec<(NodeId, usize)> =
            self.selection.roots().iter().rev().map(|&id| (id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            rows.push(TreeRow {
                id,
                depth,
                label: self.selection.label(id).unwrap_or_default().to_string(),
                state: self.selection.check_state(id),
                path: self.selection.path(id).unwrap_or_default(),
            });
            stack.extend(self.selection.children(id).iter().rev().map(|&c| (c, depth + 1)));
        }
        rows
    }

    // ── Generate ─────────────────────────────────────────────────────────

    /// "Generate PDF": render the selection and write it to `output`.
    pub fn generate(&mut self, output: impl AsRef<Path>) -> Dialog {
        let output = output.as_ref();
        if self.journals.is_empty() {
            return Dialog::info("Nothing to export", "Open an export before generating a PDF.");
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            convert::generate_to_file(
                &self.journals,
                &self.selection,
                &self.config,
                self.export_title(),
                output,
            )
        }))
        .unwrap_or_else(|_| {
            Err(Journal2PdfError::Internal(
                "PDF generation panicked".to_string(),
            ))
        });

        match result {
            Ok(rendered) => {
                let dialog = Dialog::info(
                    "PDF generated",
                    format!(
                        "Wrote {} page(s) to {}",
                        rendered.stats.total_pages,
                        output.display()
                    ),
                )
                .with_warnings(&rendered.warnings);
                for w in &rendered.warnings {
                    warn!("{w}");
                }
                self.last_render = Some(rendered);
                dialog
            }
            Err(e) => {
                error!("Generate failed: {e}");
                Dialog::error("PDF generation failed", &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::read_export_bytes;
    use std::sync::Mutex;

    fn bundle(name: &str, headings: &[&str]) -> ExportBundle {
        let body: String = headings.iter().map(|h| format!("<h2>{h}</h2><p>x</p>")).collect();
        let json = serde_json::json!({
            "_id": name.to_lowercase(),
            "name": name,
            "pages": [{"_id": "p1", "name": "Intro", "type": "text", "sort": 0,
                       "text": {"content": body}}]
        });
        read_export_bytes(json.to_string().as_bytes(), Path::new("journal.json")).unwrap()
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<usize>>);

    impl SelectionObserver for Recorder {
        fn selection_changed(&self, _model: &SelectionModel, changed: &[NodeId]) {
            self.0.lock().unwrap().push(changed.len());
        }
    }

    #[test]
    fn add_disambiguates_titles() {
        let mut s = Session::new(ExportConfig::default());
        s.open_bundle(bundle("Lore", &["A"]));
        s.add_bundle(bundle("Lore", &["B"]));
        s.add_bundle(bundle("Lore", &["C"]));
        let titles: Vec<_> = s.journals().iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, ["Lore", "Lore (2)", "Lore (3)"]);
        assert!(s.selection().find("Lore (2)/Intro/B").is_some());
        assert_eq!(s.export_title(), None);
    }

    #[test]
    fn open_replaces_and_keeps_observers() {
        let rec = Arc::new(Recorder::default());
        let mut s = Session::new(ExportConfig::default());
        s.subscribe(rec.clone());
        s.open_bundle(bundle("Lore", &["A"]));
        s.open_bundle(bundle("Maps", &["B"]));
        assert_eq!(s.journals().len(), 1);
        rec.0.lock().unwrap().clear();
        s.toggle_path("Maps/Intro/B", false).unwrap();
        assert_eq!(*rec.0.lock().unwrap(), vec![1]);
    }

    #[test]
    fn tree_rows_show_tristate() {
        let mut s = Session::new(ExportConfig::default());
        s.open_bundle(bundle("Lore", &["A", "B"]));
        s.toggle_path("Lore/Intro/A", false).unwrap();
        let rows = s.tree_rows();
        let marks: Vec<_> = rows.iter().map(|r| (r.depth, r.mark(), r.label.as_str())).collect();
        assert_eq!(
            marks,
            [
                (0, "[-]", "Lore"),
                (1, "[-]", "Intro"),
                (2, "[ ]", "A"),
                (2, "[x]", "B"),
            ]
        );
    }

    #[test]
    fn move_and_remove_keep_lists_in_step() {
        let mut s = Session::new(ExportConfig::default());
        s.open_bundle(bundle("One", &["A"]));
        s.add_bundle(bundle("Two", &["B"]));
        s.move_up(1).unwrap();
        assert_eq!(s.journals()[0].title, "Two");
        assert_eq!(s.tree_rows()[0].label, "Two");
        s.move_up(0).unwrap();
        assert!(s.move_down(5).unwrap_err().is_error());
        s.remove_journal(0).unwrap();
        assert_eq!(s.journals()[0].title, "One");
        assert!(s.selection().find("One/Intro/A").is_some());
        assert!(s.remove_journal(3).is_err());
    }

    #[test]
    fn removing_an_export_forgets_its_title() {
        let mut two = bundle("Two", &["B"]);
        two.title = Some("Second Export".into());
        two.source = PathBuf::from("two.zip");

        let mut s = Session::new(ExportConfig::default());
        s.open_bundle(bundle("One", &["A"]));
        s.add_bundle(two);
        assert_eq!(s.export_title(), None);

        s.move_up(1).unwrap();
        s.remove_journal(1).unwrap();
        assert_eq!(s.sources(), [PathBuf::from("two.zip")]);
        assert_eq!(s.export_title(), Some("Second Export"));

        s.remove_journal(0).unwrap();
        assert!(s.sources().is_empty());
        assert_eq!(s.export_title(), None);
    }

    #[test]
    fn failed_actions_return_error_dialogs() {
        let mut s = Session::new(ExportConfig::default());
        let d = s.open("/no/such/export.zip").unwrap_err();
        assert!(d.is_error());
        assert!(d.message.contains("not found"));

        s.open_bundle(bundle("Lore", &["A"]));
        s.select_none();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.pdf");
        let d = s.generate(&out);
        assert!(d.is_error());
        assert!(!out.exists());

        s.select_all();
        let d = s.generate(&out);
        assert!(!d.is_error(), "{d:?}");
        assert!(out.exists());
        assert!(s.last_render().is_some());
    }

    #[test]
    fn generate_without_journals_is_informational() {
        let mut s = Session::new(ExportConfig::default());
        let d = s.generate("unused.pdf");
        assert_eq!(d.kind, DialogKind::Info);
    }
}
