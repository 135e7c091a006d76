//! Export reading: ZIP archive, unpacked directory or bare JSON → journals.
//!
//! ## Layouts
//!
//! ```text
//! single-journal             folder export
//! ──────────────             ─────────────
//! journal.json               manifest.json
//! assets/…                   journals/<a>.json
//!                            journals/<b>.json
//!                            assets/…
//! ```
//!
//! Either layout may sit under one top-level directory inside the archive;
//! the shallowest `manifest.json` (else `journal.json`) decides the export
//! root. All assets under `<root>/assets/` are read into memory up front so
//! later stages never touch the file system.

use crate::error::{ConversionWarning, Journal2PdfError};
use crate::model::{mime_for, Asset, AssetStore, Block, JournalEntry, Page};
use crate::pipeline::normalize::normalize;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::ZipArchive;

const MANIFEST: &str = "manifest.json";
const JOURNAL: &str = "journal.json";
const ZIP_MAGIC: [&[u8]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];
/// Largest archive entry read into memory.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Which export layout was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportLayout {
    SingleJournal,
    FolderExport,
}

/// Everything read from one export.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub source: PathBuf,
    pub layout: ExportLayout,
    /// Folder name from the manifest, when present.
    pub title: Option<String>,
    pub journals: Vec<JournalEntry>,
    pub assets: Arc<AssetStore>,
    pub warnings: Vec<ConversionWarning>,
}

/// Read an export from disk.
///
/// Accepts a ZIP archive (detected by content, not extension), an unpacked
/// export directory, a `manifest.json`, or any journal JSON file.
pub fn read_export(path: &Path) -> Result<ExportBundle, Journal2PdfError> {
    if !path.exists() {
        return Err(Journal2PdfError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    if path.is_dir() {
        info!("Reading export directory: {}", path.display());
        let mut source = DirSource::walk(path).map_err(|e| io_error(path, e))?;
        return read_source(&mut source, path, EntryHint::Auto);
    }

    let mut file = open_checked(path)?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic).map_err(|e| io_error(path, e))?;

    if n == 4 && ZIP_MAGIC.contains(&&magic[..]) {
        info!("Reading ZIP export: {}", path.display());
        file.rewind().map_err(|e| io_error(path, e))?;
        let mut source = ZipSource::new(BufReader::new(file), path)?;
        return read_source(&mut source, path, EntryHint::Auto);
    }

    info!("Reading JSON export: {}", path.display());
    let (mut source, entry) = DirSource::for_file(path).map_err(|e| io_error(path, e))?;
    let hint = if file_name_is(&entry, MANIFEST) {
        EntryHint::Manifest(entry)
    } else {
        EntryHint::Journal(entry)
    };
    read_source(&mut source, path, hint)
}

/// Read an export held in memory: ZIP bytes or a journal JSON document.
pub fn read_export_bytes(bytes: &[u8], origin: &Path) -> Result<ExportBundle, Journal2PdfError> {
    if ZIP_MAGIC.iter().any(|m| bytes.starts_with(m)) {
        let mut source = ZipSource::new(Cursor::new(bytes.to_vec()), origin)?;
        return read_source(&mut source, origin, EntryHint::Auto);
    }
    let entry = origin
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| JOURNAL.to_string());
    let mut source = MemorySource {
        names: vec![entry.clone()],
        data: bytes.to_vec(),
    };
    read_source(&mut source, origin, EntryHint::Journal(entry))
}

// ── Sources ──────────────────────────────────────────────────────────────────

/// Uniform view over the files of an export.
trait ExportSource {
    /// `/`-separated paths of every regular file.
    fn entries(&self) -> &[String];
    fn read(&mut self, entry: &str) -> Result<Vec<u8>, String>;
}

struct ZipSource<R: Read + Seek> {
    archive: ZipArchive<R>,
    names: Vec<String>,
    /// Normalised name → name as stored in the archive.
    raw_names: HashMap<String, String>,
}

impl<R: Read + Seek> ZipSource<R> {
    fn new(reader: R, origin: &Path) -> Result<Self, Journal2PdfError> {
        let archive = ZipArchive::new(reader).map_err(|e| Journal2PdfError::FileFormat {
            path: origin.to_path_buf(),
            detail: format!("not a readable ZIP archive: {e}"),
        })?;
        let mut names = Vec::with_capacity(archive.len());
        let mut raw_names = HashMap::with_capacity(archive.len());
        for raw in archive.file_names() {
            if raw.ends_with('/') || raw.ends_with('\\') {
                continue;
            }
            let norm = raw.replace('\\', "/");
            raw_names.insert(norm.clone(), raw.to_string());
            names.push(norm);
        }
        names.sort();
        debug!("ZIP contains {} files", names.len());
        Ok(Self {
            archive,
            names,
            raw_names,
        })
    }
}

impl<R: Read + Seek> ExportSource for ZipSource<R> {
    fn entries(&self) -> &[String] {
        &self.names
    }

    fn read(&mut self, entry: &str) -> Result<Vec<u8>, String> {
        let raw = self
            .raw_names
            .get(entry)
            .map(String::as_str)
            .unwrap_or(entry);
        let mut file = self.archive.by_name(raw).map_err(|e| e.to_string())?;
        let declared = file.size();
        read_capped(&mut file, declared, MAX_ENTRY_BYTES)
    }
}

/// Read at most `limit` bytes. The declared size is only a capacity hint,
/// archives can claim any size they like.
fn read_capped(reader: &mut impl Read, declared: u64, limit: u64) -> Result<Vec<u8>, String> {
    let hint = declared.min(limit).min(usize::MAX as u64) as usize;
    let mut contents = Vec::with_capacity(hint);
    reader
        .take(limit + 1)
        .read_to_end(&mut contents)
        .map_err(|e| e.to_string())?;
    if contents.len() as u64 > limit {
        return Err(format!("entry is larger than {limit} bytes"));
    }
    Ok(contents)
}

struct DirSource {
    root: PathBuf,
    names: Vec<String>,
}

impl DirSource {
    /// Every file below `root`.
    fn walk(root: &Path) -> std::io::Result<Self> {
        let mut names = Vec::new();
        collect_files(root, "", &mut names, 0)?;
        names.sort();
        Ok(Self {
            root: root.to_path_buf(),
            names,
        })
    }

    /// A bare JSON file plus the sibling `assets/` and `journals/` trees.
    fn for_file(file: &Path) -> std::io::Result<(Self, String)> {
        let root = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let entry = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut names = vec![entry.clone()];
        for dir in ["assets", "Assets", "journals"] {
            let sub = root.join(dir);
            if sub.is_dir() {
                collect_files(&sub, dir, &mut names, 1)?;
            }
        }
        names.sort();
        names.dedup();
        Ok((Self { root, names }, entry))
    }
}

fn collect_files(
    dir: &Path,
    prefix: &str,
    out: &mut Vec<String>,
    depth: usize,
) -> std::io::Result<()> {
    if depth > 8 {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let ty = entry.file_type()?;
        if ty.is_dir() {
            collect_files(&entry.path(), &rel, out, depth + 1)?;
        } else if ty.is_file() {
            out.push(rel);
        }
    }
    Ok(())
}

impl ExportSource for DirSource {
    fn entries(&self) -> &[String] {
        &self.names
    }

    fn read(&mut self, entry: &str) -> Result<Vec<u8>, String> {
        std::fs::read(self.root.join(entry)).map_err(|e| e.to_string())
    }
}

struct MemorySource {
    names: Vec<String>,
    data: Vec<u8>,
}

impl ExportSource for MemorySource {
    fn entries(&self) -> &[String] {
        &self.names
    }

    fn read(&mut self, entry: &str) -> Result<Vec<u8>, String> {
        if self.names.iter().any(|n| n == entry) {
            Ok(self.data.clone())
        } else {
            Err(format!("'{entry}' not found"))
        }
    }
}

// ── Layout detection ─────────────────────────────────────────────────────────

enum EntryHint {
    Auto,
    Journal(String),
    Manifest(String),
}

fn file_name_is(path: &str, name: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|f| f.eq_ignore_ascii_case(name))
}

/// The matching entry closest to the archive root.
fn shallowest<'a>(names: &'a [String], file: &str) -> Option<&'a str> {
    names
        .iter()
        .filter(|n| file_name_is(n, file))
        .min_by_key(|n| (n.matches('/').count(), n.as_str()))
        .map(String::as_str)
}

/// Directory part of an entry including the trailing `/`, or "".
fn root_of(entry: &str) -> String {
    match entry.rfind('/') {
        Some(i) => entry[..=i].to_string(),
        None => String::new(),
    }
}

fn read_source(
    source: &mut dyn ExportSource,
    origin: &Path,
    hint: EntryHint,
) -> Result<ExportBundle, Journal2PdfError> {
    let names = source.entries().to_vec();
    let mut warnings = Vec::new();

    let (layout, manifest_or_journal) = match hint {
        EntryHint::Journal(e) => (ExportLayout::SingleJournal, e),
        EntryHint::Manifest(e) => (ExportLayout::FolderExport, e),
        EntryHint::Auto => {
            if let Some(m) = shallowest(&names, MANIFEST) {
                (ExportLayout::FolderExport, m.to_string())
            } else if let Some(j) = shallowest(&names, JOURNAL) {
                (ExportLayout::SingleJournal, j.to_string())
            } else {
                return Err(Journal2PdfError::FileFormat {
                    path: origin.to_path_buf(),
                    detail: "neither manifest.json nor journal.json found".to_string(),
                });
            }
        }
    };
    let root = root_of(&manifest_or_journal);
    debug!(
        "Detected {:?} layout rooted at '{}'",
        layout,
        if root.is_empty() { "." } else { &root }
    );

    let mut store = load_assets(source, &names, &root);
    let mut raw_journals: Vec<(String, RawJournal)> = Vec::new();
    let mut title = None;

    match layout {
        ExportLayout::SingleJournal => {
            let bytes = source
                .read(&manifest_or_journal)
                .map_err(|detail| Journal2PdfError::FileFormat {
                    path: origin.to_path_buf(),
                    detail,
                })?;
            let parsed = parse_journal_file(&bytes).map_err(|detail| {
                Journal2PdfError::MalformedJson {
                    path: origin.to_path_buf(),
                    entry: manifest_or_journal.clone(),
                    detail,
                }
            })?;
            raw_journals.extend(parsed.into_iter().map(|j| (manifest_or_journal.clone(), j)));
        }
        ExportLayout::FolderExport => {
            let bytes = source
                .read(&manifest_or_journal)
                .map_err(|detail| Journal2PdfError::FileFormat {
                    path: origin.to_path_buf(),
                    detail,
                })?;
            let manifest: RawManifest = serde_json::from_slice(strip_bom(&bytes)).map_err(|e| {
                Journal2PdfError::MalformedJson {
                    path: origin.to_path_buf(),
                    entry: manifest_or_journal.clone(),
                    detail: e.to_string(),
                }
            })?;
            if let Some(kind) = manifest.kind.as_deref() {
                if kind != "folder-export" {
                    warn!("Manifest type is '{kind}', reading it as a folder export anyway");
                }
            }
            title = manifest
                .name
                .clone()
                .or_else(|| manifest.title.clone())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());

            let entries = manifest_entries(&manifest, &names, &root);
            if entries.is_empty() {
                return Err(Journal2PdfError::FileFormat {
                    path: origin.to_path_buf(),
                    detail: "folder export lists no journal files".to_string(),
                });
            }
            for entry in entries {
                let parsed = source
                    .read(&entry)
                    .and_then(|bytes| parse_journal_file(&bytes));
                match parsed {
                    Ok(list) => raw_journals.extend(list.into_iter().map(|j| (entry.clone(), j))),
                    Err(detail) => {
                        warn!("Skipping journal file '{entry}': {detail}");
                        warnings.push(ConversionWarning::JournalSkipped { entry, detail });
                    }
                }
            }
            if raw_journals.is_empty() {
                return Err(Journal2PdfError::FileFormat {
                    path: origin.to_path_buf(),
                    detail: "no journal in the folder export could be read".to_string(),
                });
            }
        }
    }

    let mut journals: Vec<JournalEntry> = raw_journals
        .into_iter()
        .enumerate()
        .map(|(i, (_, raw))| build_journal(raw, i, &mut store, &mut warnings))
        .collect();

    let assets = Arc::new(store);
    for j in &mut journals {
        j.assets = Arc::clone(&assets);
    }

    info!(
        "Read {} journal(s), {} page(s), {} asset(s) from {}",
        journals.len(),
        journals.iter().map(|j| j.pages.len()).sum::<usize>(),
        assets.len(),
        origin.display()
    );

    Ok(ExportBundle {
        source: origin.to_path_buf(),
        layout,
        title,
        journals,
        assets,
        warnings,
    })
}

fn manifest_entries(manifest: &RawManifest, names: &[String], root: &str) -> Vec<String> {
    let listed: Vec<String> = manifest
        .journals
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => ["file", "path", "json", "href"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .filter_map(|rel| {
            let rel = rel.trim_start_matches("./").trim_start_matches('/');
            [format!("{root}{rel}"), format!("{root}journals/{rel}")]
                .into_iter()
                .find(|cand| names.iter().any(|n| n == cand))
                .or_else(|| {
                    warn!("Manifest lists '{rel}' but the export does not contain it");
                    None
                })
        })
        .collect();

    if !listed.is_empty() {
        return listed;
    }

    let dir = format!("{root}journals/");
    names
        .iter()
        .filter(|n| {
            n.strip_prefix(&dir)
                .is_some_and(|rest| !rest.contains('/') && rest.to_ascii_lowercase().ends_with(".json"))
        })
        .cloned()
        .collect()
}

fn load_assets(source: &mut dyn ExportSource, names: &[String], root: &str) -> AssetStore {
    let mut store = AssetStore::new();
    for name in names {
        let Some(rel) = name.strip_prefix(root) else {
            continue;
        };
        let Some((head, rest)) = rel.split_once('/') else {
            continue;
        };
        if !head.eq_ignore_ascii_case("assets") || rest.is_empty() {
            continue;
        }
        match source.read(name) {
            Ok(data) => store.insert(Asset::new(format!("assets/{rest}"), data)),
            Err(e) => warn!("Could not read asset '{name}': {e}"),
        }
    }
    debug!("Loaded {} assets", store.len());
    store
}

// ── JSON model ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawManifest {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
    title: Option<String>,
    journals: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJournal {
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    title: Option<Value>,
    pages: Vec<RawPage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPage {
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    sort: Option<Value>,
    title: Option<Value>,
    text: Option<Value>,
    src: Option<String>,
    image: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JournalFile {
    Many(Vec<RawJournal>),
    One(Box<RawJournal>),
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

fn parse_journal_file(bytes: &[u8]) -> Result<Vec<RawJournal>, String> {
    let file: JournalFile = serde_json::from_slice(strip_bom(bytes)).map_err(|e| e.to_string())?;
    Ok(match file {
        JournalFile::Many(list) => list,
        JournalFile::One(j) => vec![*j],
    })
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn sort_key(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn build_journal(
    raw: RawJournal,
    index: usize,
    store: &mut AssetStore,
    warnings: &mut Vec<ConversionWarning>,
) -> JournalEntry {
    let title = non_empty(raw.name.as_deref())
        .or_else(|| non_empty(raw.title.as_ref().and_then(Value::as_str)))
        .unwrap_or_else(|| "Journal".to_string());
    let id = non_empty(raw.underscore_id.as_deref())
        .or_else(|| non_empty(raw.id.as_deref()))
        .unwrap_or_else(|| format!("journal-{}", index + 1));

    let mut pages: Vec<Page> = raw
        .pages
        .into_iter()
        .enumerate()
        .map(|(i, p)| build_page(p, i, store, warnings))
        .collect();
    pages.sort_by_key(|p| p.sort);

    debug!("Journal '{}' has {} page(s)", title, pages.len());
    JournalEntry {
        id,
        title,
        pages,
        assets: Arc::new(AssetStore::new()),
    }
}

fn build_page(
    raw: RawPage,
    index: usize,
    store: &mut AssetStore,
    warnings: &mut Vec<ConversionWarning>,
) -> Page {
    let id = non_empty(raw.underscore_id.as_deref())
        .or_else(|| non_empty(raw.id.as_deref()))
        .unwrap_or_else(|| format!("page-{}", index + 1));
    let title = non_empty(raw.name.as_deref()).unwrap_or_else(|| "Page".to_string());
    let level = raw
        .title
        .as_ref()
        .and_then(|t| t.get("level"))
        .and_then(Value::as_u64)
        .map(|l| l.clamp(1, 6) as u8)
        .unwrap_or(1);
    let kind = raw.kind.as_deref().unwrap_or("text");

    let body = match kind {
        "image" => image_page_body(raw.src.as_deref(), raw.image.as_ref()),
        "text" => text_page_body(raw.text.as_ref()),
        other => match non_empty(raw.src.as_deref()) {
            Some(src) => format!(
                "<p><em>[{} page: {}]</em></p>",
                escape_html(other),
                escape_html(&src)
            ),
            None => text_page_body(raw.text.as_ref()),
        },
    };

    let normalized = normalize(&body);
    for detail in normalized.recovered {
        warn!("Page '{}': {}", title, detail);
        warnings.push(ConversionWarning::MarkupRecovery {
            page: title.clone(),
            detail,
        });
    }

    let mut blocks = normalized.blocks;
    inline_data_uris(&mut blocks, &id, store);
    for b in &blocks {
        if let Block::Image { src, .. } = b {
            store.mark_reference(src, &id);
        }
    }

    Page {
        id,
        title,
        level,
        sort: sort_key(raw.sort.as_ref()),
        body,
        blocks,
        headings: normalized.headings,
    }
}

fn text_page_body(text: Option<&Value>) -> String {
    match text {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => {
            let content = map.get("content").and_then(Value::as_str).unwrap_or("");
            if !content.trim().is_empty() {
                return content.to_string();
            }
            map.get("markdown")
                .and_then(Value::as_str)
                .map(markdown_body)
                .unwrap_or_default()
        }
        _ => String::new(),
    }
}

/// Minimal markdown → markup for pages stored in markdown format: ATX
/// headings and blank-line separated paragraphs.
fn markdown_body(md: &str) -> String {
    let mut out = String::new();
    for chunk in md.replace("\r\n", "\n").split("\n\n") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let hashes = chunk.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) && chunk[hashes..].starts_with(' ') && !chunk.contains('\n')
        {
            let text = escape_html(chunk[hashes..].trim());
            out.push_str(&format!("<h{hashes}>{text}</h{hashes}>"));
        } else {
            let lines: Vec<String> = chunk.lines().map(escape_html).collect();
            out.push_str(&format!("<p>{}</p>", lines.join("<br>")));
        }
    }
    out
}

fn image_page_body(src: Option<&str>, image: Option<&Value>) -> String {
    let mut body = String::new();
    if let Some(src) = non_empty(src) {
        body.push_str(&format!("<p><img src=\"{}\"></p>", escape_html(&src)));
    }
    let caption = image
        .and_then(|i| i.get("caption"))
        .and_then(Value::as_str)
        .and_then(|c| non_empty(Some(c)));
    if let Some(c) = caption {
        body.push_str(&format!("<p><em>{}</em></p>", escape_html(&c)));
    }
    body
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Move `data:` image sources into the asset store under synthetic names.
fn inline_data_uris(blocks: &mut [Block], page_id: &str, store: &mut AssetStore) {
    let mut n = 0;
    for b in blocks.iter_mut() {
        let Block::Image { src, .. } = b else {
            continue;
        };
        if !src.starts_with("data:") {
            continue;
        }
        match decode_data_uri(src) {
            Some((mime, data)) => {
                n += 1;
                let ext = extension_for(&mime);
                let key = format!("inline/{page_id}-{n}.{ext}");
                let mut asset = Asset::new(key.clone(), data);
                asset.mime = mime;
                store.insert(asset);
                *src = key;
            }
            None => warn!("Page '{page_id}': undecodable data URI image"),
        }
    }
}

fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mut parts = meta.split(';');
    let mime = parts
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("text/plain")
        .to_ascii_lowercase();
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));
    let data = if is_base64 {
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(cleaned.as_bytes()).ok()?
    } else {
        percent_decode_str(payload).collect()
    };
    Some((mime, data))
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn open_checked(path: &Path) -> Result<File, Journal2PdfError> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Journal2PdfError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => Journal2PdfError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => io_error(path, e),
    })
}

fn io_error(path: &Path, e: std::io::Error) -> Journal2PdfError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        return Journal2PdfError::PermissionDenied {
            path: path.to_path_buf(),
        };
    }
    Journal2PdfError::FileFormat {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut buf);
            for (name, data) in files {
                w.start_file(*name, SimpleFileOptions::default()).unwrap();
                w.write_all(data).unwrap();
            }
            w.finish().unwrap();
        }
        buf.into_inner()
    }

    const JOURNAL_JSON: &str = r#"{
        "_id": "j1", "name": "Lore",
        "pages": [
            {"_id": "p2", "name": "Second", "sort": 200, "type": "text",
             "text": {"content": "<h2>Deep</h2><p>@UUID[Actor.a]{Ana}</p>"}},
            {"_id": "p1", "name": "First", "sort": 100, "type": "text",
             "text": {"content": "<p>Hi</p><img src=\"assets/map.png\">"}}
        ]
    }"#;

    #[test]
    fn single_journal_zip_is_read_and_sorted() {
        let bytes = zip_bytes(&[
            ("journal.json", JOURNAL_JSON.as_bytes()),
            ("assets/map.png", b"not really a png"),
        ]);
        let b = read_export_bytes(&bytes, Path::new("lore.zip")).unwrap();
        assert_eq!(b.layout, ExportLayout::SingleJournal);
        assert_eq!(b.journals.len(), 1);
        let j = &b.journals[0];
        assert_eq!(j.title, "Lore");
        assert_eq!(j.pages[0].title, "First");
        assert_eq!(j.pages[1].headings[0].text, "Deep");
        let asset = b.assets.get("assets/map.png").unwrap();
        assert_eq!(asset.mime, "image/png");
        assert_eq!(asset.referenced_by, vec!["p1".to_string()]);
    }

    #[test]
    fn nested_root_folder_export_with_broken_file() {
        let manifest = r#"{"type": "folder-export", "name": "Campaign",
            "journals": ["journals/a.json", {"file": "b.json"}, "journals/broken.json"]}"#;
        let bytes = zip_bytes(&[
            ("export/manifest.json", manifest.as_bytes()),
            ("export/journals/a.json", br#"{"name": "A", "pages": []}"#),
            ("export/journals/b.json", br#"[{"name": "B1"}, {"title": "B2"}]"#),
            ("export/journals/broken.json", b"{ nope"),
            ("export/Assets/x.webp", b"..."),
        ]);
        let b = read_export_bytes(&bytes, Path::new("campaign.zip")).unwrap();
        assert_eq!(b.layout, ExportLayout::FolderExport);
        assert_eq!(b.title.as_deref(), Some("Campaign"));
        let titles: Vec<_> = b.journals.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B1", "B2"]);
        assert_eq!(b.warnings.len(), 1);
        assert!(matches!(b.warnings[0], ConversionWarning::JournalSkipped { .. }));
        assert!(b.assets.get("assets/x.webp").is_some());
    }

    #[test]
    fn folder_export_falls_back_to_journal_glob() {
        let bytes = zip_bytes(&[
            ("manifest.json", br#"{"type": "folder-export"}"#),
            ("journals/z.json", br#"{"name": "Z"}"#),
            ("journals/a.json", br#"{"name": "A"}"#),
        ]);
        let b = read_export_bytes(&bytes, Path::new("f.zip")).unwrap();
        let titles: Vec<_> = b.journals.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "Z"]);
    }

    #[test]
    fn all_journals_broken_is_fatal() {
        let bytes = zip_bytes(&[
            ("manifest.json", br#"{"journals": ["journals/x.json"]}"#),
            ("journals/x.json", b"]["),
        ]);
        let err = read_export_bytes(&bytes, Path::new("f.zip")).unwrap_err();
        assert!(matches!(err, Journal2PdfError::FileFormat { .. }), "got {err:?}");
    }

    #[test]
    fn missing_layout_files_is_fatal() {
        let bytes = zip_bytes(&[("readme.txt", b"hello")]);
        let err = read_export_bytes(&bytes, Path::new("x.zip")).unwrap_err();
        assert!(err.to_string().contains("manifest.json"));
    }

    #[test]
    fn malformed_single_journal_is_fatal() {
        let err = read_export_bytes(b"{\"name\": ", Path::new("journal.json")).unwrap_err();
        assert!(matches!(err, Journal2PdfError::MalformedJson { .. }));
    }

    #[test]
    fn bom_and_bare_string_text_accepted() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(br#"{"name": "B", "pages": [{"name": "P", "text": "<p>x</p>"}]}"#);
        let b = read_export_bytes(&bytes, Path::new("b.json")).unwrap();
        assert_eq!(b.journals[0].pages[0].blocks.len(), 1);
        assert_eq!(b.journals[0].pages[0].id, "page-1");
    }

    #[test]
    fn image_and_markdown_pages() {
        let json = r##"{"name": "J", "pages": [
            {"name": "Map", "type": "image", "src": "assets/m.png", "image": {"caption": "The map"}},
            {"name": "Notes", "type": "text", "text": {"format": 2, "markdown": "# Top\n\nline one\nline two"}}
        ]}"##;
        let b = read_export_bytes(json.as_bytes(), Path::new("j.json")).unwrap();
        let pages = &b.journals[0].pages;
        assert!(matches!(pages[0].blocks[0], Block::Image { .. }));
        assert_eq!(pages[1].headings[0].text, "Top");
        assert_eq!(pages[1].headings[0].level, 1);
    }

    #[test]
    fn data_uri_images_become_assets() {
        // 1x1 transparent PNG
        let png_b64 = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";
        let json = format!(
            r#"{{"name": "J", "pages": [{{"_id": "pp", "name": "P", "text": "<img src=\"data:image/png;base64,{png_b64}\">"}}]}}"#
        );
        let b = read_export_bytes(json.as_bytes(), Path::new("j.json")).unwrap();
        let page = &b.journals[0].pages[0];
        let Block::Image { src, .. } = &page.blocks[0] else {
            panic!("expected image")
        };
        assert_eq!(src, "inline/pp-1.png");
        let asset = b.assets.get(src).unwrap();
        assert!(asset.data.starts_with(b"\x89PNG"));
        assert_eq!(asset.referenced_by, vec!["pp".to_string()]);
    }

    #[test]
    fn directory_and_bare_file_inputs() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("journal.json"), JOURNAL_JSON).unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/map.png"), b"x").unwrap();

        let from_dir = read_export(dir.path()).unwrap();
        let from_file = read_export(&dir.path().join("journal.json")).unwrap();
        assert_eq!(from_dir.journals[0].pages, from_file.journals[0].pages);
        assert_eq!(from_file.assets.len(), 1);
    }

    #[test]
    fn nonexistent_path_is_not_found() {
        let err = read_export(Path::new("/definitely/not/here.zip")).unwrap_err();
        assert!(matches!(err, Journal2PdfError::FileNotFound { .. }));
    }

    /// Rewrite the uncompressed size the central directory claims for the
    /// first entry to something no machine can allocate.
    fn claim_huge_size(mut bytes: Vec<u8>) -> Vec<u8> {
        let at = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        let u16_at = |b: &[u8], i: usize| usize::from(u16::from_le_bytes([b[i], b[i + 1]]));
        let name_len = u16_at(&bytes, at + 28);
        let extra_len = u16_at(&bytes, at + 30);
        if bytes[at + 24..at + 28] != [0xFF; 4] {
            bytes[at + 24..at + 28].copy_from_slice(&0xFFFF_FFFEu32.to_le_bytes());
            return bytes;
        }
        let mut i = at + 46 + name_len;
        let end = i + extra_len;
        while i + 4 <= end {
            let (id, len) = (u16_at(&bytes, i), u16_at(&bytes, i + 2));
            if id == 0x0001 {
                bytes[i + 4..i + 12].copy_from_slice(&(u64::MAX / 2).to_le_bytes());
                return bytes;
            }
            i += 4 + len;
        }
        panic!("central directory entry has no zip64 field");
    }

    #[test]
    fn declared_entry_size_does_not_drive_allocation() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut buf);
            let opts = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored)
                .large_file(true);
            w.start_file("journal.json", opts).unwrap();
            w.write_all(JOURNAL_JSON.as_bytes()).unwrap();
            w.finish().unwrap();
        }
        let bytes = claim_huge_size(buf.into_inner());

        match read_export_bytes(&bytes, Path::new("huge.zip")) {
            Ok(b) => assert_eq!(b.journals[0].title, "Lore"),
            Err(e) => assert!(
                matches!(e, Journal2PdfError::FileFormat { .. } | Journal2PdfError::MalformedJson { .. }),
                "{e}"
            ),
        }
    }

    #[test]
    fn oversized_entries_are_rejected() {
        let data = vec![b'x'; 64];
        let err = read_capped(&mut Cursor::new(&data[..]), u64::MAX, 16).unwrap_err();
        assert!(err.contains("larger than 16 bytes"));

        let ok = read_capped(&mut Cursor::new(&data[..]), u64::MAX / 2, 64).unwrap();
        assert_eq!(ok.len(), 64);
        assert!(ok.capacity() <= 128);
    }
}
