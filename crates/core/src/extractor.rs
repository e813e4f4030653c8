use crate::config::ExtractionSettings;
use crate::error::IngestError;
use crate::models::{Extraction, PageText};
use crate::traits::OcrEngine;
use lopdf::Document;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        Ok(pages)
    }
}

pub struct Extractor<D, O> {
    direct: Arc<D>,
    ocr: O,
    settings: ExtractionSettings,
}

impl<D, O> Extractor<D, O>
where
    D: PdfExtractor + 'static,
    O: OcrEngine,
{
    pub fn new(direct: D, ocr: O, settings: ExtractionSettings) -> Self {
        Self {
            direct: Arc::new(direct),
            ocr,
            settings,
        }
    }

    /// When the text layer yields fewer than `ocr_trigger_chars` characters in total the
    /// partial result is discarded and every page is OCRed instead. A direct extraction
    /// error counts as zero characters. Parsing runs on the blocking pool.
    pub async fn extract(&self, path: &Path) -> Result<Extraction, IngestError> {
        tokio::fs::metadata(path).await?;

        let direct = Arc::clone(&self.direct);
        let owned_path = path.to_path_buf();
        let direct_pages =
            match tokio::task::spawn_blocking(move || direct.extract_pages(&owned_path)).await {
                Ok(Ok(pages)) => pages,
                Ok(Err(error)) => {
                    warn!(path = %path.display(), error = %error, "direct text extraction failed");
                    Vec::new()
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "direct text extraction task aborted");
                    Vec::new()
                }
            };

        let total_chars: usize = direct_pages
            .iter()
            .map(|page| page.text.chars().count())
            .sum();

        if total_chars > 0 && total_chars >= self.settings.ocr_trigger_chars {
            return Ok(Extraction {
                pages: direct_pages,
                used_ocr: false,
            });
        }

        info!(
            path = %path.display(),
            total_chars,
            threshold = self.settings.ocr_trigger_chars,
            "insufficient text layer, falling back to OCR"
        );

        let recognized = self.ocr.recognize(path).await.map_err(|error| {
            IngestError::ExtractionExhausted {
                path: path.to_path_buf(),
                reason: error.to_string(),
            }
        })?;

        let pages: Vec<PageText> = recognized
            .into_iter()
            .filter(|page| !page.text.trim().is_empty())
            .collect();

        if pages.is_empty() {
            return Err(IngestError::ExtractionExhausted {
                path: path.to_path_buf(),
                reason: "OCR produced no text".to_string(),
            });
        }

        Ok(Extraction {
            pages,
            used_ocr: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    enum FakeDirect {
        Pages(Vec<PageText>),
        Broken,
        Panics,
        Slow(Duration),
    }

    impl PdfExtractor for FakeDirect {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            match self {
                Self::Pages(pages) => Ok(pages.clone()),
                Self::Broken => Err(IngestError::PdfParse("xref table is corrupt".to_string())),
                Self::Panics => panic!("parser bug"),
                Self::Slow(delay) => {
                    std::thread::sleep(*delay);
                    Ok(vec![page(1, &"x".repeat(80))])
                }
            }
        }
    }

    struct FakeOcr {
        pages: Option<Vec<PageText>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .clone()
                .ok_or_else(|| IngestError::OcrFailed("tesseract missing".to_string()))
        }
    }

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    fn extractor(
        direct: FakeDirect,
        ocr_pages: Option<Vec<PageText>>,
    ) -> (Extractor<FakeDirect, FakeOcr>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let ocr = FakeOcr {
            pages: ocr_pages,
            calls: Arc::clone(&calls),
        };
        (
            Extractor::new(direct, ocr, ExtractionSettings::default()),
            calls,
        )
    }

    #[tokio::test]
    async fn sparse_text_layer_triggers_ocr() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let (extractor, calls) = extractor(
            FakeDirect::Pages(vec![page(1, "~ %")]),
            Some(vec![page(1, "Scanned invoice"), page(2, "   "), page(3, "Totals")]),
        );

        let extraction = extractor.extract(file.path()).await?;

        assert!(extraction.used_ocr);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            extraction.pages,
            vec![page(1, "Scanned invoice"), page(3, "Totals")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn rich_text_layer_never_runs_ocr() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let text = "a".repeat(50);
        let (extractor, calls) = extractor(
            FakeDirect::Pages(vec![page(1, &text)]),
            Some(vec![page(1, "ocr text")]),
        );

        let extraction = extractor.extract(file.path()).await?;

        assert!(!extraction.used_ocr);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(extraction.pages, vec![page(1, &text)]);
        Ok(())
    }

    #[tokio::test]
    async fn threshold_counts_characters_across_pages() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let (extractor, calls) = extractor(
            FakeDirect::Pages(vec![page(1, &"é".repeat(25)), page(2, &"b".repeat(24))]),
            Some(vec![page(1, "ocr")]),
        );

        let extraction = extractor.extract(file.path()).await?;

        assert!(extraction.used_ocr);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn direct_failure_is_swallowed_and_ocr_runs() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let (extractor, calls) = extractor(FakeDirect::Broken, Some(vec![page(1, "recovered")]));

        let extraction = extractor.extract(file.path()).await?;

        assert!(extraction.used_ocr);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(extraction.pages[0].text, "recovered");
        Ok(())
    }

    #[tokio::test]
    async fn panicking_parser_falls_back_to_ocr() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let (extractor, calls) = extractor(FakeDirect::Panics, Some(vec![page(1, "recovered")]));

        let extraction = extractor.extract(file.path()).await?;

        assert!(extraction.used_ocr);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn slow_parsing_leaves_the_runtime_responsive() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let (extractor, calls) = extractor(
            FakeDirect::Slow(Duration::from_millis(300)),
            Some(vec![page(1, "ocr")]),
        );

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let extraction = extractor.extract(file.path()).await?;
        ticker.abort();

        assert!(!extraction.used_ocr);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(ticks.load(Ordering::SeqCst) > 0, "ticker should run while the PDF is parsed");
        Ok(())
    }

    #[tokio::test]
    async fn empty_ocr_output_exhausts_extraction() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let (extractor, _) = extractor(
            FakeDirect::Pages(vec![page(1, "short")]),
            Some(vec![page(1, "  \n")]),
        );

        let result = extractor.extract(file.path()).await;

        assert!(matches!(result, Err(IngestError::ExtractionExhausted { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn ocr_failure_exhausts_extraction() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        let (extractor, _) = extractor(FakeDirect::Broken, None);

        let result = extractor.extract(file.path()).await;

        assert!(matches!(result, Err(IngestError::ExtractionExhausted { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let (extractor, calls) = extractor(FakeDirect::Broken, Some(vec![page(1, "x")]));

        let result = extractor.extract(Path::new("/definitely/not/here.pdf")).await;

        assert!(matches!(result, Err(IngestError::Io(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn lopdf_rejects_garbage() -> Result<(), Box<dyn std::error::Error>> {
        let file = NamedTempFile::new()?;
        std::fs::write(file.path(), b"%PDF-1.4\n%broken")?;
        assert!(LopdfExtractor.extract_pages(file.path()).is_err());
        Ok(())
    }
}
