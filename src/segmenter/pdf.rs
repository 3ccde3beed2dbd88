//! Extracting selected pages of an uploaded PDF as standalone single-page documents.
//!
//! Each page is rebuilt in a fresh document from the objects reachable from its page
//! dictionary, so the cost grows with the selected pages and not with the whole file.

use crate::pipeline::PageRange;
use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Upper bound on page tree depth when resolving inherited attributes.
const MAX_TREE_DEPTH: usize = 64;

/// Errors raised while reading an uploaded PDF.
#[derive(Debug, Error)]
pub enum PdfError {
    /// The bytes are not a PDF `lopdf` can read.
    #[error("Failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),
    /// The document is encrypted and cannot be split.
    #[error("Encrypted PDFs are not supported")]
    Encrypted,
    /// The document has no pages.
    #[error("PDF contains no pages")]
    Empty,
    /// Writing a page out as its own document failed.
    #[error("Failed to write page {page}: {message}")]
    Write {
        /// 1-based page number.
        page: usize,
        /// Writer error message.
        message: String,
    },
}

/// One extracted page.
#[derive(Debug, Clone)]
pub struct PdfPage {
    /// 1-based position in the source document.
    pub number: usize,
    /// Standalone single-page PDF.
    pub bytes: Vec<u8>,
}

/// Page count of the upload together with the pages selected for ingestion.
#[derive(Debug, Clone)]
pub struct SplitPdf {
    /// Pages in the source document.
    pub page_count: usize,
    /// Selected pages in page order; empty when the range starts past the last page.
    pub pages: Vec<PdfPage>,
}

/// Parse `bytes` and extract the pages of `range` as single-page PDFs.
pub fn split_pages(bytes: &[u8], range: PageRange) -> Result<SplitPdf, PdfError> {
    let document = Document::load_mem(bytes)?;
    if document.is_encrypted() {
        return Err(PdfError::Encrypted);
    }

    let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(PdfError::Empty);
    }
    let page_count = page_ids.len();
    let selected = range.indices(page_count);
    tracing::debug!(
        page_count,
        selected = selected.len(),
        "Extracting PDF pages"
    );

    let all_pages: BTreeSet<ObjectId> = page_ids.iter().copied().collect();
    let pages = selected
        .map(|index| {
            let number = index + 1;
            let bytes = extract_page(&document, page_ids[index], &all_pages)
                .map_err(|error| PdfError::Write {
                    page: number,
                    message: error.to_string(),
                })?;
            Ok(PdfPage { number, bytes })
        })
        .collect::<Result<Vec<_>, PdfError>>()?;

    Ok(SplitPdf { page_count, pages })
}

fn extract_page(
    source: &Document,
    page_id: ObjectId,
    all_pages: &BTreeSet<ObjectId>,
) -> Result<Vec<u8>, lopdf::Error> {
    let mut page = source.get_dictionary(page_id)?.clone();
    inherit_attributes(source, &mut page)?;
    page.remove(b"Parent");

    let mut target = Document::with_version(source.version.clone());
    let pages_id = target.new_object_id();
    let new_page_id = target.new_object_id();

    let mut copy = ObjectCopy {
        source,
        target: &mut target,
        mapped: BTreeMap::from([(page_id, new_page_id)]),
        other_pages: all_pages,
    };
    let mut page = copy.dictionary(&page)?;
    page.set("Parent", pages_id);

    target.objects.insert(new_page_id, Object::Dictionary(page));
    target.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(new_page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = target.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    target.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    target.save_to(&mut buffer)?;
    Ok(buffer)
}

fn inherit_attributes(source: &Document, page: &mut Dictionary) -> Result<(), lopdf::Error> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let Some(node_id) = parent else {
            break;
        };
        let node = source.get_dictionary(node_id)?;
        for key in INHERITABLE {
            if !page.has(key)
                && let Ok(value) = node.get(key)
            {
                page.set(key.to_vec(), value.clone());
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(())
}

/// Deep copy of the objects reachable from one page into a new document.
///
/// `Parent` links are dropped and references to other pages become `null`, which keeps the
/// rest of the page tree out of the copy.
struct ObjectCopy<'a> {
    source: &'a Document,
    target: &'a mut Document,
    mapped: BTreeMap<ObjectId, ObjectId>,
    other_pages: &'a BTreeSet<ObjectId>,
}

impl ObjectCopy<'_> {
    fn object(&mut self, object: &Object) -> Result<Object, lopdf::Error> {
        Ok(match object {
            Object::Reference(id) => self.reference(*id)?,
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|item| self.object(item))
                    .collect::<Result<_, _>>()?,
            ),
            Object::Dictionary(dict) => Object::Dictionary(self.dictionary(dict)?),
            Object::Stream(stream) => {
                let mut stream = stream.clone();
                stream.dict = self.dictionary(&stream.dict)?;
                Object::Stream(stream)
            }
            other => other.clone(),
        })
    }

    fn dictionary(&mut self, dict: &Dictionary) -> Result<Dictionary, lopdf::Error> {
        let mut copied = Dictionary::new();
        for (key, value) in dict.iter() {
            if key.as_slice() == b"Parent" {
                continue;
            }
            copied.set(key.clone(), self.object(value)?);
        }
        Ok(copied)
    }

    fn reference(&mut self, id: ObjectId) -> Result<Object, lopdf::Error> {
        if let Some(&new_id) = self.mapped.get(&id) {
            return Ok(Object::Reference(new_id));
        }
        if self.other_pages.contains(&id) {
            return Ok(Object::Null);
        }
        let new_id = self.target.new_object_id();
        // Map before descending so cycles resolve to the id being built.
        self.mapped.insert(id, new_id);
        let source = self.source;
        let object = self.object(source.get_object(id)?)?;
        self.target.objects.insert(new_id, object);
        Ok(Object::Reference(new_id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::Stream;
    use std::time::{Duration, Instant};

    /// Build a minimal PDF with `pages` blank pages.
    pub(crate) fn blank_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("save pdf");
        buffer
    }

    /// Pages carry a content stream naming their number; the media box and a shared font
    /// resource live on the page tree root.
    fn numbered_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let kids: Vec<Object> = (1..=pages)
            .map(|number| {
                let content = Stream::new(dictionary! {}, format!("% page {number}").into_bytes());
                let content_id = doc.add_object(content);
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("save pdf");
        buffer
    }

    fn only_page(bytes: &[u8]) -> (Document, ObjectId) {
        let doc = Document::load_mem(bytes).expect("reload page");
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let id = *pages.values().next().expect("one page");
        (doc, id)
    }

    #[test]
    fn extracts_selected_pages_in_order() {
        let range = PageRange::new(2, 3).expect("range");
        let split = split_pages(&numbered_pdf(4), range).expect("split");
        assert_eq!(split.page_count, 4);
        assert_eq!(
            split.pages.iter().map(|page| page.number).collect::<Vec<_>>(),
            vec![2, 3]
        );

        for page in &split.pages {
            let (doc, id) = only_page(&page.bytes);
            let content = doc.get_page_content(id).expect("page content");
            let expected = format!("% page {}", page.number);
            assert_eq!(String::from_utf8_lossy(&content), expected);
        }
    }

    #[test]
    fn extracted_page_keeps_inherited_attributes() {
        let split = split_pages(&numbered_pdf(2), PageRange::default()).expect("split");
        let (doc, id) = only_page(&split.pages[0].bytes);
        let page = doc.get_dictionary(id).expect("page dictionary");
        assert!(page.has(b"MediaBox"));

        let resources = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .expect("resources");
        let font_ref = resources
            .get(b"Font")
            .and_then(Object::as_dict)
            .and_then(|fonts| fonts.get(b"F1"))
            .and_then(Object::as_reference)
            .expect("font reference");
        let font = doc.get_dictionary(font_ref).expect("font object");
        assert_eq!(
            font.get(b"BaseFont").and_then(Object::as_name).expect("name"),
            b"Helvetica"
        );
    }

    #[test]
    fn range_past_the_end_selects_nothing() {
        let split = split_pages(&blank_pdf(2), PageRange::new(5, 6).expect("range")).expect("split");
        assert_eq!(split.page_count, 2);
        assert!(split.pages.is_empty());
    }

    #[test]
    fn single_page_of_a_long_document_is_fast() {
        let pdf = blank_pdf(400);
        let started = Instant::now();
        let split = split_pages(&pdf, PageRange::default()).expect("split");
        assert_eq!(split.page_count, 400);
        assert_eq!(split.pages.len(), 1);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "splitting took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn every_page_of_a_long_document_stays_linear() {
        let pdf = blank_pdf(300);
        let started = Instant::now();
        let split = split_pages(&pdf, PageRange::new(1, 300).expect("range")).expect("split");
        assert_eq!(split.pages.len(), 300);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "splitting took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let error =
            split_pages(b"definitely not a pdf", PageRange::default()).expect_err("parse failure");
        assert!(matches!(error, PdfError::Parse(_)));
    }
}
