//! Index gap repair: re-ingest archived documents the index cannot find.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{GapFailure, GapSyncOutcome, IndexTarget, ReconcileError, ReconciliationService};
use crate::clients::{DocumentParser, FlatMetadata};

impl ReconciliationService {
    /// Find archived URLs missing from the index and, unless `dry_run`,
    /// download, parse and ingest each one.
    ///
    /// A failed gap is recorded and the run moves on. A dry run only lists
    /// candidates. A real run refuses to start when the index could not be
    /// listed, since every archived URL would then look like a gap.
    pub async fn sync_rag_gaps(
        &self,
        scraper_name: &str,
        dry_run: bool,
    ) -> Result<GapSyncOutcome, ReconcileError> {
        let workdir = tempfile::tempdir()?;
        self.sync_rag_gaps_in(scraper_name, dry_run, workdir.path())
            .await
    }

    /// [`sync_rag_gaps`](Self::sync_rag_gaps) with downloads staged under
    /// `workdir`. Each gap's files are removed once it is handled.
    pub(crate) async fn sync_rag_gaps_in(
        &self,
        scraper_name: &str,
        dry_run: bool,
        workdir: &Path,
    ) -> Result<GapSyncOutcome, ReconcileError> {
        let sources = self.build_report(scraper_name).await;
        let Some(archive_urls) = sources.archive_urls else {
            let reason = sources
                .report
                .errors
                .iter()
                .find(|e| e.starts_with("Archive:"))
                .cloned()
                .unwrap_or_else(|| "listing failed".to_string());
            return Err(ReconcileError::ArchiveUnavailable(reason));
        };

        let mut outcome = GapSyncOutcome {
            scraper_name: scraper_name.to_string(),
            dry_run,
            candidates: sources.report.urls_missing_from_index,
            ..Default::default()
        };

        if dry_run || outcome.candidates.is_empty() {
            info!(
                "Gap sync for {}: {} candidates{}",
                scraper_name,
                outcome.candidates.len(),
                if dry_run { " (dry run)" } else { "" }
            );
            return Ok(outcome);
        }

        if !sources.index_listed {
            return Err(ReconcileError::IndexUnavailable(
                "cannot list index documents, refusing to re-ingest the whole archive".to_string(),
            ));
        }
        let target = self
            .index
            .as_ref()
            .ok_or(ReconcileError::Misconfigured("no index configured"))?;
        let parser = self
            .parser
            .as_ref()
            .ok_or(ReconcileError::Misconfigured("no document parser configured"))?;

        for (i, url) in outcome.candidates.iter().enumerate() {
            let Some(document_id) = archive_urls.get(url) else {
                continue;
            };
            let slot = workdir.join(i.to_string());
            let repaired = self
                .repair_gap(target, parser, &slot, scraper_name, url, document_id)
                .await;
            if let Err(e) = tokio::fs::remove_dir_all(&slot).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", slot.display(), e);
                }
            }
            match repaired {
                Ok(()) => {
                    debug!("Re-ingested {} (archive id {})", url, document_id);
                    outcome.synced.push(url.clone());
                }
                Err(error) => {
                    warn!("Failed to re-ingest {}: {}", url, error);
                    outcome.failed.push(GapFailure {
                        url: url.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            "Gap sync for {}: {} synced, {} failed of {}",
            scraper_name,
            outcome.synced.len(),
            outcome.failed.len(),
            outcome.candidates.len()
        );
        Ok(outcome)
    }

    async fn repair_gap(
        &self,
        target: &IndexTarget,
        parser: &Arc<dyn DocumentParser>,
        slot: &Path,
        scraper_name: &str,
        url: &str,
        document_id: &str,
    ) -> Result<(), String> {
        let content = match self.archive.download_document(document_id).await {
            Ok(Some(content)) => content,
            Ok(None) => return Err(format!("document {document_id} not found in archive")),
            Err(e) => return Err(format!("download failed: {e}")),
        };

        tokio::fs::create_dir_all(slot)
            .await
            .map_err(|e| format!("cannot create work dir: {e}"))?;
        let path = slot.join(file_name_for(url, document_id));
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| format!("cannot write temp file: {e}"))?;

        let mut context = serde_json::Map::new();
        context.insert("source_url".into(), url.into());
        context.insert("scraper".into(), scraper_name.into());
        context.insert("archive_document_id".into(), document_id.into());

        let parsed = parser
            .parse_document(&path, &context)
            .await
            .map_err(|e| format!("parse failed: {e}"))?;
        let text_path = match parsed.text_path {
            Some(text_path) if parsed.success => text_path,
            _ => {
                return Err(format!(
                    "parse failed: {}",
                    parsed.error.unwrap_or_else(|| "no text produced".to_string())
                ))
            }
        };

        let metadata: FlatMetadata = context
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect();
        let response = target
            .client
            .ingest_document(&text_path, &metadata, &target.collection)
            .await
            .map_err(|e| format!("ingest failed: {e}"))?;
        if response.success {
            Ok(())
        } else {
            Err(format!(
                "ingest rejected: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            ))
        }
    }
}

/// Temp filename for a downloaded document: the URL's last path segment,
/// or `document-<id>` when the URL has none.
fn file_name_for(url: &str, document_id: &str) -> PathBuf {
    let segment = url::Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
    });
    let name = segment.unwrap_or_else(|| format!("document-{document_id}"));
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    PathBuf::from(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::testing::{FakeArchive, FakeIndex, FakeParser};
    use crate::repository::ledger::test_support::setup_ledger;

    const X: &str = "https://example.org/files/x.pdf";

    async fn service(
        archive: FakeArchive,
        index: Arc<FakeIndex>,
        parser: Arc<FakeParser>,
    ) -> (ReconciliationService, tempfile::TempDir) {
        let (ledger, dir) = setup_ledger().await;
        let service = ReconciliationService::new(ledger, Arc::new(archive))
            .with_index(index, "ds")
            .with_parser(parser);
        (service, dir)
    }

    #[tokio::test]
    async fn test_dry_run_lists_candidates_without_side_effects() {
        let archive = FakeArchive::with_urls(&[("https://example.org/a.pdf", "1"), (X, "2")]);
        let index = Arc::new(FakeIndex::with_source_urls(&["https://example.org/a.pdf"]));
        let parser = Arc::new(FakeParser::default());
        let (service, _dir) = service(archive, index.clone(), parser.clone()).await;

        let outcome = service.sync_rag_gaps("fbi", true).await.unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.candidates, vec![X]);
        assert!(outcome.synced.is_empty());
        assert_eq!(index.ingest_count(), 0);
        assert_eq!(parser.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_ingests_gap_with_provenance() {
        let index = Arc::new(FakeIndex::default());
        let (service, _dir) = service(
            FakeArchive::with_urls(&[(X, "42")]),
            index.clone(),
            Arc::new(FakeParser::default()),
        )
        .await;

        let outcome = service.sync_rag_gaps("fbi", false).await.unwrap();
        assert_eq!(outcome.synced, vec![X]);
        assert!(outcome.failed.is_empty());

        let ingests = index.ingests.lock().unwrap().clone();
        assert_eq!(ingests.len(), 1);
        assert_eq!(ingests[0]["source_url"], X);
        assert_eq!(ingests[0]["scraper"], "fbi");
        assert_eq!(ingests[0]["archive_document_id"], "42");

        // The repaired document is now discoverable.
        let report = service.get_report("fbi").await;
        assert!(report.urls_missing_from_index.is_empty());
    }

    #[tokio::test]
    async fn test_sync_records_failures_and_continues() {
        let good = "https://example.org/good.pdf";
        let unparseable = "https://example.org/bad.pdf";
        let mut archive = FakeArchive::with_urls(&[(good, "1"), (unparseable, "2"), (X, "3")]);
        archive.contents.remove("3");
        let parser = Arc::new(FakeParser {
            fail_for: ["bad.pdf".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let (service, _dir) = service(archive, Arc::new(FakeIndex::default()), parser).await;

        let outcome = service.sync_rag_gaps("fbi", false).await.unwrap();
        assert_eq!(outcome.candidates.len(), 3);
        assert_eq!(outcome.synced, vec![good]);
        assert_eq!(outcome.failed.len(), 2);
        let bad = outcome.failed.iter().find(|f| f.url == unparseable).unwrap();
        assert!(bad.error.contains("parse failed"));
        let missing = outcome.failed.iter().find(|f| f.url == X).unwrap();
        assert!(missing.error.contains("not found"));
    }

    #[tokio::test]
    async fn test_rejected_provenance_is_a_failed_gap() {
        let index = Arc::new(FakeIndex {
            reject_metadata: true,
            ..Default::default()
        });
        let (service, _dir) = service(
            FakeArchive::with_urls(&[(X, "42")]),
            index.clone(),
            Arc::new(FakeParser::default()),
        )
        .await;

        let outcome = service.sync_rag_gaps("fbi", false).await.unwrap();
        assert!(outcome.synced.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed[0].error.contains("rejected document metadata"));
        assert!(index.documents.lock().unwrap().is_empty());

        // Still a gap, and a rerun does not pile up copies.
        let again = service.sync_rag_gaps("fbi", false).await.unwrap();
        assert_eq!(again.candidates, vec![X]);
        assert!(index.documents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_leaves_no_temp_files_behind() {
        let good = "https://example.org/good.pdf";
        let (service, _dir) = service(
            FakeArchive::with_urls(&[(good, "1"), (X, "2")]),
            Arc::new(FakeIndex::default()),
            Arc::new(FakeParser::default()),
        )
        .await;
        let workdir = tempfile::tempdir().unwrap();

        let outcome = service
            .sync_rag_gaps_in("fbi", false, workdir.path())
            .await
            .unwrap();
        assert_eq!(outcome.synced.len(), 2);
        assert_eq!(std::fs::read_dir(workdir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_sync_refuses_when_index_listing_fails() {
        let index = Arc::new(FakeIndex {
            fail_listing: true,
            ..Default::default()
        });
        let (service, _dir) = service(
            FakeArchive::with_urls(&[(X, "1")]),
            index.clone(),
            Arc::new(FakeParser::default()),
        )
        .await;

        let dry = service.sync_rag_gaps("fbi", true).await.unwrap();
        assert_eq!(dry.candidates, vec![X]);

        assert!(matches!(
            service.sync_rag_gaps("fbi", false).await,
            Err(ReconcileError::IndexUnavailable(_))
        ));
        assert_eq!(index.ingest_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_requires_parser_and_archive() {
        let (ledger, _dir) = setup_ledger().await;
        let no_parser = ReconciliationService::new(
            ledger.clone(),
            Arc::new(FakeArchive::with_urls(&[(X, "1")])),
        )
        .with_index(Arc::new(FakeIndex::default()), "ds");
        assert!(matches!(
            no_parser.sync_rag_gaps("fbi", false).await,
            Err(ReconcileError::Misconfigured(_))
        ));

        let no_archive = ReconciliationService::new(
            ledger,
            Arc::new(FakeArchive {
                fail_listing: true,
                ..Default::default()
            }),
        );
        assert!(matches!(
            no_archive.sync_rag_gaps("fbi", true).await,
            Err(ReconcileError::ArchiveUnavailable(_))
        ));
    }

    #[test]
    fn test_file_name_for() {
        assert_eq!(file_name_for(X, "1"), PathBuf::from("x.pdf"));
        assert_eq!(file_name_for("https://example.org/", "7"), PathBuf::from("document-7"));
        assert_eq!(file_name_for("not a url", "7"), PathBuf::from("document-7"));
        assert_eq!(
            file_name_for("https://example.org/a%20b.pdf", "1"),
            PathBuf::from("a_20b.pdf")
        );
    }
}
