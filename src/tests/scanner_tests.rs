#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::atomic::Ordering, sync::Arc};

    use tempfile::TempDir;
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    use crate::catalog::{CatalogStore, PlatformRecord, ProviderMatches, ScannedPlatform, ScannedRom};
    use crate::inventory::names::RomName;
    use crate::providers::{ExternalIds, ProviderKind};
    use crate::scanner::{ScanError, Scanner};
    use crate::tests::support::{drain, game, memory_catalog, scanner, touch, StubProvider};
    use crate::types::{FailureReason, ScanEvent, ScanMode, ScanRequest, ScanStatistics};

    fn library() -> TempDir {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        touch(base, "roms/snes/Zelda (USA).sfc", 10);
        touch(base, "roms/snes/Mario (Europe) (Rev 1).sfc", 10);
        touch(base, "roms/snes/Unknown Game.sfc", 10);
        touch(base, "bios/snes/bios.bin", 4);
        touch(base, "roms/gba/Golden Sun.gba", 10);
        touch(base, "roms/game-boy/Tetris.gb", 10);
        dir
    }

    fn igdb() -> StubProvider {
        StubProvider::new(ProviderKind::Igdb)
            .platform("snes", 19)
            .platform("gba", 24)
            .game("Zelda", 1026)
            .game("Mario", 1070)
            .game("Golden Sun", 500)
    }

    async fn run(scanner: &Scanner, request: ScanRequest) -> (Result<ScanStatistics, ScanError>, Vec<ScanEvent>) {
        let (tx, mut rx) = broadcast::channel(1024);
        let res = scanner.run(&request, &tx, &CancellationToken::new()).await;
        (res, drain(&mut rx))
    }

    fn names(events: &[ScanEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.name()).collect()
    }

    fn assert_single_terminal(events: &[ScanEvent]) {
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().unwrap().is_terminal());
    }

    fn failure(events: &[ScanEvent]) -> (FailureReason, String) {
        match events.last() {
            Some(ScanEvent::DoneKo(f)) => (f.reason, f.message.clone()),
            other => panic!("expected done_ko, got {:?}", other),
        }
    }

    async fn seed_platform(catalog: &Arc<dyn CatalogStore>, fs_slug: &str, ids: ExternalIds) -> PlatformRecord {
        catalog
            .upsert_platform(&ScannedPlatform {
                fs_slug: fs_slug.into(),
                slug: fs_slug.into(),
                name: fs_slug.into(),
                external_ids: ids,
            })
            .await
            .unwrap()
    }

    async fn seed_rom(catalog: &Arc<dyn CatalogStore>, platform_id: i64, file_name: &str, metadata: ProviderMatches) -> i64 {
        let parsed = RomName::parse(file_name, false);
        catalog
            .upsert_rom(&ScannedRom {
                platform_id,
                file_name: file_name.into(),
                file_name_no_tags: parsed.file_name_no_tags.clone(),
                file_name_no_ext: parsed.file_name_no_ext,
                file_extension: parsed.file_extension,
                file_path: "roms/snes".into(),
                file_size_bytes: 10,
                name: parsed.file_name_no_tags,
                tags: parsed.tags,
                multi: false,
                files: vec![],
                metadata,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_quick_scan_of_new_library() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let igdb = Arc::new(igdb());
        let scanner = scanner(catalog.clone(), lib.path(), vec![igdb.clone()]);

        let (res, events) = run(&scanner, ScanRequest::new(ScanMode::Quick)).await;
        let stats = res.unwrap();

        assert_eq!(
            names(&events),
            vec![
                "scanning_platform", // game-boy
                "scanning_rom",
                "scanning_platform", // gba
                "scanning_rom",
                "scanning_platform", // snes
                "scanning_firmware",
                "scanning_rom",
                "scanning_rom",
                "scanning_rom",
                "done",
            ]
        );
        assert_eq!(events.last(), Some(&ScanEvent::Done(stats)));
        assert_eq!((stats.scanned_platforms, stats.added_platforms, stats.identified_platforms), (3, 3, 2));
        assert_eq!((stats.scanned_roms, stats.added_roms, stats.identified_roms), (5, 5, 3));
        assert_eq!((stats.scanned_firmware, stats.added_firmware), (1, 1));
        // game-boy has no provider platform, so its rom is never searched
        assert_eq!(igdb.name_calls.load(Ordering::SeqCst), 4);

        let gb = catalog.get_platform_by_fs_slug("game-boy").await.unwrap().unwrap();
        assert_eq!(gb.name, "Game Boy");
        assert!(!gb.external_ids.has_any());
        let snes = catalog.get_platform_by_fs_slug("snes").await.unwrap().unwrap();
        assert_eq!(snes.name, "SNES");
        assert_eq!(snes.external_ids.igdb_id, Some(19));

        let zelda = catalog.get_rom_by_file_name(snes.id, "Zelda (USA).sfc").await.unwrap().unwrap();
        assert_eq!(zelda.name, "Zelda");
        assert_eq!(zelda.tags.regions, vec!["USA"]);
        assert_eq!(zelda.external_ids().igdb_id, Some(1026));
        assert_eq!(zelda.file_path, "roms/snes");
        let mario = catalog.get_rom_by_file_name(snes.id, "Mario (Europe) (Rev 1).sfc").await.unwrap().unwrap();
        assert_eq!(mario.tags.revision.as_deref(), Some("1"));
        let unknown = catalog.get_rom_by_file_name(snes.id, "Unknown Game.sfc").await.unwrap().unwrap();
        assert_eq!(unknown.name, "Unknown Game");
        assert!(!unknown.external_ids().has_any());
        assert_eq!(catalog.list_firmware(snes.id).await.unwrap().len(), 1);

        match &events[6] {
            ScanEvent::ScanningRom(ev) => {
                assert_eq!(ev.platform_slug, "snes");
                assert_eq!(ev.rom.file_name, "Mario (Europe) (Rev 1).sfc");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_quick_scan_skips_known_roms() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let igdb = Arc::new(igdb());
        let scanner = scanner(catalog.clone(), lib.path(), vec![igdb.clone()]);
        run(&scanner, ScanRequest::new(ScanMode::Quick)).await.0.unwrap();
        let searches = igdb.searches();

        touch(lib.path(), "roms/snes/New Game.sfc", 1);
        let (res, _) = run(&scanner, ScanRequest::new(ScanMode::Quick)).await;
        let stats = res.unwrap();

        assert_eq!((stats.scanned_roms, stats.added_roms), (1, 1));
        assert_eq!(stats.scanned_platforms, 3);
        assert_eq!(igdb.searches(), searches + 1);
    }

    #[tokio::test]
    async fn test_partial_scan_scenario() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "roms/snes/Identified.sfc", 1);
        touch(dir.path(), "roms/snes/Unidentified.sfc", 1);
        touch(dir.path(), "roms/snes/New.sfc", 1);
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let snes = seed_platform(&catalog, "snes", ExternalIds { igdb_id: Some(19), moby_id: Some(15) }).await;
        let full = ProviderMatches {
            igdb_metadata: Some(game(1, "Identified")),
            moby_metadata: Some(game(2, "Identified")),
        };
        let identified_id = seed_rom(&catalog, snes.id, "Identified.sfc", full.clone()).await;
        seed_rom(&catalog, snes.id, "Unidentified.sfc", ProviderMatches::default()).await;
        let stale_id = seed_rom(&catalog, snes.id, "Stale.sfc", ProviderMatches::default()).await;

        let igdb = Arc::new(StubProvider::new(ProviderKind::Igdb).platform("snes", 19).game("Unidentified", 10));
        let moby = Arc::new(StubProvider::new(ProviderKind::Moby).platform("snes", 15));
        let scanner = scanner(catalog.clone(), dir.path(), vec![igdb.clone(), moby.clone()]);

        let (res, events) = run(&scanner, ScanRequest::new(ScanMode::Partial)).await;
        let stats = res.unwrap();

        assert_eq!(stats.scanned_roms, 2);
        assert_eq!(stats.added_roms, 1);
        assert_eq!(stats.identified_roms, 1);
        assert_eq!(igdb.name_calls.load(Ordering::SeqCst), 2);
        assert_eq!(moby.name_calls.load(Ordering::SeqCst), 2);
        assert_eq!(igdb.id_calls.load(Ordering::SeqCst), 0);
        assert_single_terminal(&events);

        let identified = catalog.get_rom(identified_id).await.unwrap().unwrap();
        assert_eq!(identified.metadata, full);
        assert!(catalog.get_rom(stale_id).await.unwrap().is_none());
        let unidentified = catalog.get_rom_by_file_name(snes.id, "Unidentified.sfc").await.unwrap().unwrap();
        assert_eq!(unidentified.external_ids(), ExternalIds { igdb_id: Some(10), moby_id: None });
        assert!(catalog.get_rom_by_file_name(snes.id, "New.sfc").await.unwrap().is_some());
        assert_eq!(catalog.list_roms(snes.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_providers_fails_before_any_io() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let stale = seed_platform(&catalog, "n64", ExternalIds::default()).await;
        let scanner = scanner(catalog.clone(), lib.path(), vec![]);

        let (res, events) = run(&scanner, ScanRequest::new(ScanMode::Quick)).await;
        assert!(matches!(res, Err(ScanError::NoProviders)));
        assert_eq!(events.len(), 1);
        assert_eq!(failure(&events), (FailureReason::NoProviders, "No metadata providers enabled".to_string()));
        // untouched, not even purged
        assert_eq!(catalog.list_platforms().await.unwrap(), vec![stale]);
    }

    #[tokio::test]
    async fn test_requested_provider_not_enabled() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let scanner = scanner(catalog.clone(), lib.path(), vec![Arc::new(igdb())]);
        let request = ScanRequest { apis: vec!["moby".into()], ..ScanRequest::new(ScanMode::Quick) };

        let (res, events) = run(&scanner, request).await;
        assert!(matches!(res, Err(ScanError::NoProviders)));
        assert_eq!(names(&events), vec!["done_ko"]);
        assert!(catalog.list_platforms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_structural_error_leaves_catalog_alone() {
        let dir = TempDir::new().unwrap();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let existing = seed_platform(&catalog, "snes", ExternalIds::default()).await;
        let scanner = scanner(catalog.clone(), &dir.path().join("missing"), vec![Arc::new(igdb())]);

        let (res, events) = run(&scanner, ScanRequest::new(ScanMode::Quick)).await;
        assert!(matches!(res, Err(ScanError::Structure(_))));
        assert_eq!(events.len(), 1);
        let (reason, message) = failure(&events);
        assert_eq!(reason, FailureReason::Structure);
        assert!(message.contains("Platforms not found"));
        assert_eq!(catalog.list_platforms().await.unwrap(), vec![existing]);
    }

    #[tokio::test]
    async fn test_new_platforms_mode_skips_known_platforms() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let snes = seed_platform(&catalog, "snes", ExternalIds::default()).await;
        let igdb = Arc::new(igdb());
        let scanner = scanner(catalog.clone(), lib.path(), vec![igdb.clone()]);

        let (res, events) = run(&scanner, ScanRequest::new(ScanMode::NewPlatforms)).await;
        let stats = res.unwrap();

        assert_eq!((stats.scanned_platforms, stats.added_platforms), (2, 2));
        assert_eq!(stats.scanned_roms, 2);
        assert!(catalog.list_roms(snes.id).await.unwrap().is_empty());
        // a skipped platform is still on disk, so it survives the purge
        assert_eq!(catalog.get_platform(snes.id).await.unwrap(), Some(snes));
        let platform_events = events.iter().filter(|e| matches!(e, ScanEvent::ScanningPlatform(_))).count();
        assert_eq!(platform_events, 2);
    }

    #[tokio::test]
    async fn test_complete_rescans_identified_roms_by_id() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let igdb = Arc::new(igdb());
        let scanner = scanner(catalog.clone(), lib.path(), vec![igdb.clone()]);
        run(&scanner, ScanRequest::new(ScanMode::Quick)).await.0.unwrap();
        let (ids_before, names_before) =
            (igdb.id_calls.load(Ordering::SeqCst), igdb.name_calls.load(Ordering::SeqCst));

        let (res, _) = run(&scanner, ScanRequest::new(ScanMode::Complete)).await;
        let stats = res.unwrap();

        assert_eq!((stats.scanned_roms, stats.added_roms, stats.identified_roms), (5, 0, 3));
        assert_eq!(igdb.id_calls.load(Ordering::SeqCst) - ids_before, 3);
        assert_eq!(igdb.name_calls.load(Ordering::SeqCst) - names_before, 1);
        assert!(stats.added_roms <= stats.scanned_roms);
        assert!(stats.identified_roms <= stats.scanned_roms);
    }

    #[tokio::test]
    async fn test_empty_or_failing_provider_keeps_previous_match() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        run(&scanner(catalog.clone(), lib.path(), vec![Arc::new(igdb())]), ScanRequest::new(ScanMode::Quick))
            .await
            .0
            .unwrap();
        let snes = catalog.get_platform_by_fs_slug("snes").await.unwrap().unwrap();

        let empty = Arc::new(StubProvider::new(ProviderKind::Igdb).platform("snes", 19).platform("gba", 24));
        let (res, _) = run(&scanner(catalog.clone(), lib.path(), vec![empty]), ScanRequest::new(ScanMode::Complete)).await;
        assert_eq!(res.unwrap().identified_roms, 3);

        let failing = Arc::new(igdb().failing());
        let (res, events) =
            run(&scanner(catalog.clone(), lib.path(), vec![failing.clone()]), ScanRequest::new(ScanMode::Complete)).await;
        assert!(res.is_ok());
        assert!(failing.searches() > 0);
        assert!(matches!(events.last(), Some(ScanEvent::Done(_))));

        let zelda = catalog.get_rom_by_file_name(snes.id, "Zelda (USA).sfc").await.unwrap().unwrap();
        assert_eq!(zelda.metadata.igdb_metadata, Some(game(1026, "Zelda")));
        assert_eq!(zelda.name, "Zelda");
    }

    #[tokio::test]
    async fn test_providers_fill_independent_matches() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let moby = Arc::new(StubProvider::new(ProviderKind::Moby).platform("snes", 15).game("Zelda", 77));
        let scanner = scanner(catalog.clone(), lib.path(), vec![Arc::new(igdb()), moby]);

        run(&scanner, ScanRequest::new(ScanMode::Quick)).await.0.unwrap();
        let snes = catalog.get_platform_by_fs_slug("snes").await.unwrap().unwrap();
        assert_eq!(snes.external_ids, ExternalIds { igdb_id: Some(19), moby_id: Some(15) });
        let zelda = catalog.get_rom_by_file_name(snes.id, "Zelda (USA).sfc").await.unwrap().unwrap();
        assert_eq!(zelda.external_ids(), ExternalIds { igdb_id: Some(1026), moby_id: Some(77) });
        let mario = catalog.get_rom_by_file_name(snes.id, "Mario (Europe) (Rev 1).sfc").await.unwrap().unwrap();
        assert!(mario.metadata.moby_metadata.is_none());
    }

    #[tokio::test]
    async fn test_purges_platforms_and_files_gone_from_disk() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let n64 = seed_platform(&catalog, "n64", ExternalIds::default()).await;
        let mario64 = seed_rom(&catalog, n64.id, "Mario 64.z64", ProviderMatches::default()).await;
        let scanner = scanner(catalog.clone(), lib.path(), vec![Arc::new(igdb())]);
        run(&scanner, ScanRequest::new(ScanMode::Quick)).await.0.unwrap();

        assert!(catalog.get_platform(n64.id).await.unwrap().is_none());
        assert!(catalog.get_rom(mario64).await.unwrap().is_none());

        std::fs::remove_file(lib.path().join("bios/snes/bios.bin")).unwrap();
        std::fs::remove_file(lib.path().join("roms/snes/Unknown Game.sfc")).unwrap();
        run(&scanner, ScanRequest::new(ScanMode::Quick)).await.0.unwrap();

        let snes = catalog.get_platform_by_fs_slug("snes").await.unwrap().unwrap();
        assert!(catalog.list_firmware(snes.id).await.unwrap().is_empty());
        let left: Vec<String> = catalog.list_roms(snes.id).await.unwrap().into_iter().map(|r| r.file_name).collect();
        assert_eq!(left, vec!["Mario (Europe) (Rev 1).sfc", "Zelda (USA).sfc"]);
    }

    #[tokio::test]
    async fn test_platform_filter_and_rom_selection() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let igdb = Arc::new(igdb());
        let scanner = scanner(catalog.clone(), lib.path(), vec![igdb.clone()]);
        run(&scanner, ScanRequest::new(ScanMode::Quick)).await.0.unwrap();
        let snes = catalog.get_platform_by_fs_slug("snes").await.unwrap().unwrap();
        let zelda = catalog.get_rom_by_file_name(snes.id, "Zelda (USA).sfc").await.unwrap().unwrap();
        let before = igdb.searches();

        let request = ScanRequest {
            platforms: vec![snes.id, 9999],
            roms: vec![zelda.id],
            ..ScanRequest::new(ScanMode::NoScan)
        };
        let (res, events) = run(&scanner, request).await;
        let stats = res.unwrap();

        assert_eq!(stats.scanned_platforms, 1);
        assert_eq!(stats.scanned_roms, 1);
        assert_eq!(igdb.searches(), before + 1);
        let rom_events: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::ScanningRom(ev) => Some(ev.rom.file_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(rom_events, vec!["Zelda (USA).sfc"]);
        // platforms outside the filter are still on disk and kept
        assert_eq!(catalog.list_platforms().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_platform_bindings_drive_provider_lookup() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "roms/super_nintendo/Zelda.sfc", 1);
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let scanner = scanner(catalog.clone(), dir.path(), vec![Arc::new(igdb())])
            .with_platform_bindings(HashMap::from([("super_nintendo".to_string(), "snes".to_string())]));

        run(&scanner, ScanRequest::new(ScanMode::Quick)).await.0.unwrap();
        let platform = catalog.get_platform_by_fs_slug("super_nintendo").await.unwrap().unwrap();
        assert_eq!(platform.slug, "snes");
        assert_eq!(platform.external_ids.igdb_id, Some(19));
        let zelda = catalog.get_rom_by_file_name(platform.id, "Zelda.sfc").await.unwrap().unwrap();
        assert_eq!(zelda.external_ids().igdb_id, Some(1026));
    }

    #[tokio::test]
    async fn test_missing_rom_folder_is_localized() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "snes/roms/Zelda.sfc", 1);
        touch(dir.path(), "gba/bios/gba_bios.bin", 1);
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let scanner = scanner(catalog.clone(), dir.path(), vec![Arc::new(igdb())]);

        let (res, _) = run(&scanner, ScanRequest::new(ScanMode::Quick)).await;
        let stats = res.unwrap();
        assert_eq!(stats.scanned_platforms, 2);
        assert_eq!(stats.scanned_roms, 1);
        assert_eq!(stats.scanned_firmware, 1);
        let zelda_platform = catalog.get_platform_by_fs_slug("snes").await.unwrap().unwrap();
        assert_eq!(catalog.list_roms(zelda_platform.id).await.unwrap()[0].file_path, "snes/roms");
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_mutation() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "roms/snes/Mario.sfc", 1);
        touch(dir.path(), "roms/snes/Zelda.sfc", 1);
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let token = CancellationToken::new();
        let igdb = Arc::new(igdb().cancelling(token.clone()));
        let scanner = scanner(catalog.clone(), dir.path(), vec![igdb.clone()]);

        let (tx, mut rx) = broadcast::channel(64);
        let res = scanner.run(&ScanRequest::new(ScanMode::Quick), &tx, &token).await;
        let events = drain(&mut rx);

        assert!(matches!(res, Err(ScanError::Cancelled)));
        assert_eq!(names(&events), vec!["scanning_platform", "done_ko"]);
        assert_eq!(failure(&events), (FailureReason::Cancelled, "manually stopped".to_string()));
        assert_eq!(igdb.searches(), 1);
        let snes = catalog.get_platform_by_fs_slug("snes").await.unwrap().unwrap();
        assert!(catalog.list_roms(snes.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let lib = library();
        let catalog: Arc<dyn CatalogStore> = memory_catalog().await;
        let scanner = scanner(catalog.clone(), lib.path(), vec![Arc::new(igdb())]);
        let token = CancellationToken::new();
        token.cancel();

        let (tx, mut rx) = broadcast::channel(16);
        let res = scanner.run(&ScanRequest::new(ScanMode::Quick), &tx, &token).await;
        assert!(matches!(res, Err(ScanError::Cancelled)));
        assert_eq!(names(&drain(&mut rx)), vec!["done_ko"]);
        assert!(catalog.list_platforms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_with_done_ko() {
        let lib = library();
        let sqlite = memory_catalog().await;
        sqlx::query("DROP TABLE roms").execute(sqlite.pool()).await.unwrap();
        let catalog: Arc<dyn CatalogStore> = sqlite.clone();
        let scanner = scanner(catalog.clone(), lib.path(), vec![Arc::new(igdb())]);

        let (res, events) = run(&scanner, ScanRequest::new(ScanMode::Quick)).await;
        assert!(matches!(res, Err(ScanError::Failed(_))));
        assert_single_terminal(&events);
        assert_eq!(failure(&events).0, FailureReason::Error);
        // the first platform was committed before the failure
        assert_eq!(names(&events)[0], "scanning_platform");
        assert!(catalog.get_platform_by_fs_slug("game-boy").await.unwrap().is_some());
    }

    #[test]
    fn test_scan_error_failure_payload() {
        let f = ScanError::Cancelled.failure();
        assert_eq!(f.reason, FailureReason::Cancelled);
        assert_eq!(f.message, "manually stopped");
        let f = ScanError::Failed(anyhow::anyhow!("disk full")).failure();
        assert_eq!(f.reason, FailureReason::Error);
        assert_eq!(f.message, "disk full");
        let json = serde_json::to_value(ScanEvent::DoneKo(ScanError::NoProviders.failure())).unwrap();
        assert_eq!(json["event"], "done_ko");
        assert_eq!(json["data"]["reason"], "no_providers");
    }
}
