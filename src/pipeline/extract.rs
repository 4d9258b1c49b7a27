//! PDF extraction: one page image plus raw text per page, via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool so the Tokio workers never stall during CPU-heavy
//! rasterisation.
//!
//! ## Failure policy
//!
//! One corrupt PDF must not stall the corpus: a file that fails to open or
//! render produces a single logged [`UnitError::Extraction`] and the walk
//! continues with the next file. Only a missing input directory is fatal.

use crate::config::PipelineConfig;
use crate::corpus::{Category, PageImage, PageRecord};
use crate::error::{SiftError, UnitError};
use crate::report::ReportLog;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything the extractor produced for one directory walk.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub pages: Vec<PageRecord>,
    /// PDF files considered (including ones that later failed).
    pub files_seen: usize,
    /// Documents that extracted successfully.
    pub documents: usize,
}

/// Extract every `<document_id>.pdf` under `input_dir`.
///
/// Files whose stem is not a numeric document id are skipped with a debug
/// log; they are data-layout noise, not errors.
pub async fn extract_directory(
    input_dir: &Path,
    category: Category,
    config: &PipelineConfig,
    report: &ReportLog,
) -> Result<ExtractionOutcome, SiftError> {
    if !input_dir.is_dir() {
        return Err(SiftError::InputDirNotFound {
            path: input_dir.to_path_buf(),
        });
    }

    let mut files = list_pdf_files(input_dir)?;
    files.sort_by_key(|(id, _)| *id);
    info!(
        "Found {} PDF files in {}",
        files.len(),
        input_dir.display()
    );

    let mut pages = Vec::new();
    let mut documents = 0usize;
    let files_seen = files.len();
    let max_pixels = config.max_rendered_pixels;

    for (document_id, path) in files {
        let task_path = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            extract_file_blocking(&task_path, document_id, category, max_pixels)
        })
        .await
        .map_err(|e| SiftError::Internal(format!("extraction task panicked: {e}")))?;

        match result {
            Ok(mut file_pages) => {
                debug!(
                    "Extracted {} pages from {}",
                    file_pages.len(),
                    path.display()
                );
                documents += 1;
                pages.append(&mut file_pages);
            }
            Err(unit_error) => report.record(&unit_error),
        }
    }

    Ok(ExtractionOutcome {
        pages,
        files_seen,
        documents,
    })
}

/// Collect `(document_id, path)` for every numeric-stem PDF in the directory.
fn list_pdf_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>, SiftError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SiftError::Internal(format!(
        "read_dir {}: {e}",
        dir.display()
    )))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SiftError::Internal(format!("dir entry: {e}")))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pdf") {
            continue;
        }
        match path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok())
        {
            Some(id) => files.push((id, path)),
            None => debug!("Skipping non-numeric PDF name: {}", path.display()),
        }
    }
    Ok(files)
}

/// Blocking extraction of one PDF: text, image-object count, and a
/// rasterised image per page.
fn extract_file_blocking(
    pdf_path: &Path,
    document_id: u32,
    category: Category,
    max_pixels: u32,
) -> Result<Vec<PageRecord>, UnitError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| UnitError::Extraction {
            document_id,
            detail: format!("{e:?}"),
        })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let pages = document.pages();
    let mut records = Vec::with_capacity(pages.len() as usize);

    for (index, page) in pages.iter().enumerate() {
        let page_number = (index + 1) as u32;

        let raw_text = page.text().map(|t| t.all()).unwrap_or_default();

        let image_count = page
            .objects()
            .iter()
            .filter(|object| object.object_type() == PdfPageObjectType::Image)
            .count() as u32;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| UnitError::Extraction {
                document_id,
                detail: format!("page {page_number} rasterisation: {e:?}"),
            })?;
        let rendered = bitmap.as_image();
        let page_image = encode_page(&rendered).map_err(|e| UnitError::Extraction {
            document_id,
            detail: format!("page {page_number} PNG encode: {e}"),
        })?;

        records.push(PageRecord::new(
            document_id,
            category,
            page_number,
            raw_text,
            Some(page_image),
            image_count,
        ));
    }

    Ok(records)
}

/// PNG-encode a rendered page.
///
/// PNG over JPEG: lossless compression preserves text crispness, which is
/// what the vision model needs to read fine print and table cells.
fn encode_page(image: &DynamicImage) -> Result<PageImage, image::ImageError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    Ok(PageImage {
        png,
        width: image.width(),
        height: image.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_page_produces_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 4, Rgba([0, 0, 255, 255])));
        let encoded = encode_page(&img).expect("encode should succeed");
        assert_eq!(encoded.width, 8);
        assert_eq!(encoded.height, 4);
        assert_eq!(&encoded.png[..4], b"\x89PNG");
    }

    #[test]
    fn list_pdf_files_filters_non_numeric() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("101.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("102.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("101.txt"), b"x").unwrap();

        let mut files = list_pdf_files(dir.path()).unwrap();
        files.sort_by_key(|(id, _)| *id);
        let ids: Vec<u32> = files.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![101, 102]);
    }

    #[tokio::test]
    async fn missing_directory_is_fatal() {
        let config = PipelineConfig::default();
        let report = ReportLog::in_memory();
        let err = extract_directory(
            Path::new("/definitely/not/here"),
            Category::Finance,
            &config,
            &report,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SiftError::InputDirNotFound { .. }));
    }
}
