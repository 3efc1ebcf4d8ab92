use crate::error::IngestError;
use crate::models::{RawDocument, PAGE_KEY};
use crate::walker::dotted_extension;
use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extensions routed to [`PdfLoader`] by the default registry.
pub const PDF_EXTENSIONS: [&str; 2] = [".pdf", ".PDF"];

pub trait DocumentLoader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Loads a file into one or more documents, each carrying `source`.
    fn load(&self, path: &Path) -> Result<Vec<RawDocument>, IngestError>;
}

fn source_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Whole-file UTF-8 loader. Invalid UTF-8 is an error, not a lossy decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextLoader;

impl DocumentLoader for PlainTextLoader {
    fn name(&self) -> &'static str {
        "text"
    }

    fn load(&self, path: &Path) -> Result<Vec<RawDocument>, IngestError> {
        let bytes = fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|source| IngestError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(vec![RawDocument::new(text, source_string(path))])
    }
}

/// One document per page, `page` is zero-based.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn load(&self, path: &Path) -> Result<Vec<RawDocument>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let source = source_string(path);
        let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();
        if page_numbers.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        let mut pages = Vec::new();
        for page_no in page_numbers {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(format!("page {page_no}: {error}")))?;

            pages.push(
                RawDocument::new(text, source.clone())
                    .with_metadata(PAGE_KEY, i64::from(page_no) - 1),
            );
        }

        Ok(pages)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub loader: &'static str,
    pub reason: String,
}

#[derive(Debug)]
pub enum LoadResult {
    Loaded(Vec<RawDocument>),
    Skipped(SkippedFile),
}

/// Maps case-sensitive extensions to loaders, with a fallback for the rest.
pub struct LoaderRegistry {
    by_extension: HashMap<String, Arc<dyn DocumentLoader>>,
    fallback: Arc<dyn DocumentLoader>,
}

impl LoaderRegistry {
    pub fn new<L: DocumentLoader + 'static>(fallback: L) -> Self {
        Self {
            by_extension: HashMap::new(),
            fallback: Arc::new(fallback),
        }
    }

    /// Routes every extension in `extensions` (leading dot included) to
    /// `loader`, replacing earlier registrations.
    pub fn register<L: DocumentLoader + 'static>(&mut self, extensions: &[&str], loader: L) {
        let loader: Arc<dyn DocumentLoader> = Arc::new(loader);
        for extension in extensions {
            self.by_extension
                .insert((*extension).to_string(), Arc::clone(&loader));
        }
    }

    pub fn loader_for(&self, path: &Path) -> &dyn DocumentLoader {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();

        self.by_extension
            .get(dotted_extension(&name))
            .unwrap_or(&self.fallback)
            .as_ref()
    }

    /// Loads one file. Nothing escapes: errors and loader panics become
    /// [`LoadResult::Skipped`].
    pub fn load(&self, path: &Path) -> LoadResult {
        let loader = self.loader_for(path);
        let skipped = |reason: String| {
            LoadResult::Skipped(SkippedFile {
                path: path.to_path_buf(),
                loader: loader.name(),
                reason,
            })
        };

        match panic::catch_unwind(AssertUnwindSafe(|| loader.load(path))) {
            Ok(Ok(documents)) => LoadResult::Loaded(documents),
            Ok(Err(error)) => skipped(error.to_string()),
            Err(_) => skipped(format!("{} loader panicked", loader.name())),
        }
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = Self::new(PlainTextLoader);
        registry.register(&PDF_EXTENSIONS, PdfLoader);
        registry
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::Path;

    /// Writes a PDF with one text line per page.
    pub(crate) fn write_pdf(path: &Path, pages: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_pdf;
    use super::*;
    use crate::models::{MetadataValue, SOURCE_KEY};
    use tempfile::tempdir;

    struct UpperLoader;

    impl DocumentLoader for UpperLoader {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn load(&self, path: &Path) -> Result<Vec<RawDocument>, IngestError> {
            let text = fs::read_to_string(path)?.to_uppercase();
            Ok(vec![RawDocument::new(text, source_string(path))])
        }
    }

    fn loaded(result: LoadResult) -> Vec<RawDocument> {
        match result {
            LoadResult::Loaded(documents) => documents,
            LoadResult::Skipped(skipped) => panic!("unexpected skip: {}", skipped.reason),
        }
    }

    #[test]
    fn plain_text_is_one_document_with_source() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Title\n\nbody")?;

        let documents = loaded(LoaderRegistry::default().load(&path));
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "# Title\n\nbody");
        assert_eq!(documents[0].source(), Some(path.to_string_lossy().as_ref()));
        Ok(())
    }

    #[test]
    fn empty_text_file_still_yields_a_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.txt");
        fs::write(&path, "")?;

        let documents = loaded(LoaderRegistry::default().load(&path));
        assert_eq!(documents.len(), 1);
        assert!(documents[0].text.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_utf8_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("binary.dat");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x80])?;

        match LoaderRegistry::default().load(&path) {
            LoadResult::Skipped(skipped) => {
                assert_eq!(skipped.path, path);
                assert_eq!(skipped.loader, "text");
                assert!(skipped.reason.contains("utf-8"));
            }
            LoadResult::Loaded(_) => panic!("invalid utf-8 should not load"),
        }
        Ok(())
    }

    #[test]
    fn pdf_yields_one_document_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.pdf");
        write_pdf(&path, &["Alpha page", "Bravo page"])?;

        let documents = loaded(LoaderRegistry::default().load(&path));
        assert_eq!(documents.len(), 2);
        assert!(documents[0].text.contains("Alpha"));
        assert!(documents[1].text.contains("Bravo"));
        assert_eq!(documents[0].metadata.get(PAGE_KEY), Some(&MetadataValue::Number(0)));
        assert_eq!(documents[1].metadata.get(PAGE_KEY), Some(&MetadataValue::Number(1)));
        for document in &documents {
            assert_eq!(
                document.metadata.get(SOURCE_KEY),
                Some(&MetadataValue::Text(path.to_string_lossy().to_string()))
            );
        }
        Ok(())
    }

    #[test]
    fn pdf_dispatch_is_case_sensitive() {
        let registry = LoaderRegistry::default();

        assert_eq!(registry.loader_for(Path::new("a.pdf")).name(), "pdf");
        assert_eq!(registry.loader_for(Path::new("a.PDF")).name(), "pdf");
        assert_eq!(registry.loader_for(Path::new("a.Pdf")).name(), "text");
        assert_eq!(registry.loader_for(Path::new("README")).name(), "text");
    }

    #[test]
    fn corrupt_pdf_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        match LoaderRegistry::default().load(&path) {
            LoadResult::Skipped(skipped) => assert_eq!(skipped.loader, "pdf"),
            LoadResult::Loaded(_) => panic!("corrupt pdf should not load"),
        }
        Ok(())
    }

    #[test]
    fn registered_loader_takes_over_extension() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("shout.txt");
        fs::write(&path, "quiet")?;

        let mut registry = LoaderRegistry::default();
        registry.register(&[".txt"], UpperLoader);

        let documents = loaded(registry.load(&path));
        assert_eq!(documents[0].text, "QUIET");
        assert_eq!(registry.loader_for(Path::new("x.pdf")).name(), "pdf");
        Ok(())
    }
}
