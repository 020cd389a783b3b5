//! End-to-end tests: generate a dataset, then resolve addresses against it.

use geoblock::{
    BincodeCodec, BlockFetcher, BlockId, BlockStore, Codec, CodecError, DatasetHandle, DirStore,
    Error, FallbackFetcher, FetchError, GeneratedDataset, Generator, GeneratorConfig,
    LookupConfig, LookupEngine, MemoryStore,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const LOCATIONS: &str = "\
geoname_id,locale_code,continent_code,continent_name,country_iso_code,country_name,subdivision_1_iso_code,subdivision_1_name,subdivision_2_iso_code,subdivision_2_name,city_name,metro_code,time_zone,is_in_european_union
3039163,en,EU,Europe,AD,Andorra,06,\"Sant Julia de Loria\",,,\"Sant Julià de Lòria\",,Europe/Andorra,0
12042053,en,AS,Asia,AE,\"United Arab Emirates\",AZ,\"Abu Dhabi\",,,\"Musaffah City\",,Asia/Dubai,0
765876,en,EU,Europe,PL,Poland,06,\"Lublin Voivodeship\",,,Lublin,,Europe/Warsaw,1
5391959,en,NA,\"North America\",US,\"United States\",CA,California,,,\"San Francisco\",807,America/Los_Angeles,0
5375480,en,NA,\"North America\",US,\"United States\",CA,California,,,\"Mountain View\",807,America/Los_Angeles,0
";

const BLOCKS_V4: &str = "\
network,geoname_id,registered_country_geoname_id,represented_country_geoname_id,is_anonymous_proxy,is_satellite_provider,postal_code,latitude,longitude,accuracy_radius
2.56.139.0/24,5391959,6252001,,0,0,94119,37.7794,-122.4176,1000
8.8.8.0/24,5375480,6252001,,0,0,94043,37.4223,-122.0850,1000
94.59.56.0/24,12042053,290557,,0,0,,24.3613,54.4803,50
194.158.92.192/26,3039163,3041565,,0,0,,42.4678,1.5005,20
213.195.159.0/24,765876,798544,,0,0,20-128,51.2574,22.5850,5
";

const BLOCKS_V6: &str = "\
network,geoname_id,registered_country_geoname_id,represented_country_geoname_id,is_anonymous_proxy,is_satellite_provider,postal_code,latitude,longitude,accuracy_radius
2a02:8100::/32,765876,798544,,0,0,,,,100
";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn generate_with<S: BlockStore>(config: GeneratorConfig, store: &mut S) -> GeneratedDataset {
    init_logger();
    let generator = Generator::new(config.with_concurrency(2)).unwrap();
    generator
        .generate(
            LOCATIONS.as_bytes(),
            [BLOCKS_V4.as_bytes(), BLOCKS_V6.as_bytes()],
            store,
        )
        .unwrap()
}

fn generate(store: &mut MemoryStore) -> BlockId {
    generate_with(GeneratorConfig::default(), store).root
}

/// Counts fetches reaching the wrapped source.
struct Counting<F> {
    inner: F,
    fetches: Arc<AtomicUsize>,
}

impl<F: BlockFetcher> BlockFetcher for Counting<F> {
    fn fetch(&self, id: &BlockId) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(id)
    }
}

/// Fails the first `failures` decodes, then decodes normally.
struct FlakyCodec {
    failures: AtomicU32,
}

impl FlakyCodec {
    fn failing(times: u32) -> Self {
        Self {
            failures: AtomicU32::new(times),
        }
    }
}

impl Codec for FlakyCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        BincodeCodec::new().encode(value)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(CodecError::Decode("simulated decode failure".to_string()));
        }
        BincodeCodec::new().decode(bytes)
    }
}

#[test]
fn test_lookup_andorra() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    let location = engine.lookup(&root, "194.158.92.200").unwrap();
    assert_eq!(location.country_name, "Andorra");
    assert_eq!(location.country_code, "AD");
    assert_eq!(location.region_code, "06");
    assert_eq!(location.city, "Sant Julià de Lòria");
    assert_eq!(location.postal_code, "");
    assert_eq!(location.latitude, Some(42.4678));
    assert_eq!(location.longitude, Some(1.5005));
    assert_eq!(location.planet, "Earth");

    let padded = engine.lookup(&root, "194.158.092.200").unwrap();
    assert_eq!(padded, location);
}

#[test]
fn test_lookup_all_rows() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    let uae = engine.lookup(&root, "94.59.56.17").unwrap();
    assert_eq!(uae.country_name, "United Arab Emirates");
    assert_eq!(uae.city, "Musaffah City");

    let poland = engine.lookup(&root, "213.195.159.200").unwrap();
    assert_eq!(poland.city, "Lublin");
    assert_eq!(poland.postal_code, "20-128");

    let us = engine.lookup(&root, "2.56.139.10").unwrap();
    assert_eq!(us.country_name, "USA");
    assert_eq!(us.city, "San Francisco");
}

#[test]
fn test_lookup_outside_all_ranges() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    assert!(matches!(
        engine.lookup(&root, "8.8.4.4"),
        Err(Error::UnmappedRange)
    ));
    assert!(matches!(
        engine.lookup(&root, "1.1.1.1"),
        Err(Error::UnmappedRange)
    ));
}

#[test]
fn test_range_boundaries() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    // 194.158.92.192/26 spans .192 to .255
    assert!(engine.lookup(&root, "194.158.92.192").is_ok());
    assert!(engine.lookup(&root, "194.158.92.255").is_ok());
    assert!(matches!(
        engine.lookup(&root, "194.158.92.191"),
        Err(Error::UnmappedRange)
    ));
    assert!(matches!(
        engine.lookup(&root, "194.158.93.0"),
        Err(Error::UnmappedRange)
    ));
}

#[test]
fn test_range_boundaries_with_full_ends() {
    let mut store = MemoryStore::new();
    let config = GeneratorConfig::default().with_compact_range_ends(false);
    let root = generate_with(config, &mut store).root;
    let engine = LookupEngine::new(store);

    assert!(engine.lookup(&root, "194.158.92.255").is_ok());
    assert!(matches!(
        engine.lookup(&root, "194.158.93.0"),
        Err(Error::UnmappedRange)
    ));
}

#[test]
fn test_ipv6_lookup() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    let location = engine.lookup(&root, "2a02:8100:1::1").unwrap();
    assert_eq!(location.country_code, "PL");

    // IPv4-mapped form of an IPv4 address resolves the same record
    let mapped = engine.lookup(&root, "::ffff:194.158.92.200").unwrap();
    assert_eq!(mapped.country_code, "AD");

    assert!(matches!(
        engine.lookup(&root, "2a03::1"),
        Err(Error::UnmappedRange)
    ));
}

#[test]
fn test_invalid_address() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    for input in ["", "1.2.3", "256.1.1.1", "1::2::3", "hello"] {
        assert!(
            matches!(engine.lookup(&root, input), Err(Error::InvalidAddress(_))),
            "{:?} should be rejected",
            input
        );
    }
    assert_eq!(engine.fetch_count(), 0);
}

#[test]
fn test_repeated_lookup_fetches_nothing() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let fetches = Arc::new(AtomicUsize::new(0));
    let engine = LookupEngine::new(Counting {
        inner: store,
        fetches: fetches.clone(),
    });

    let first = engine.lookup(&root, "213.195.159.1").unwrap();
    let after_first = fetches.load(Ordering::SeqCst);
    assert!(after_first > 0);

    let second = engine.lookup(&root, "213.195.159.1").unwrap();
    assert_eq!(first, second);
    assert_eq!(fetches.load(Ordering::SeqCst), after_first);
}

#[test]
fn test_failed_lookup_is_not_cached() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);

    // Nothing to fetch yet: the lookup fails with a transient error
    let sources = FallbackFetcher::new(Vec::new());
    let engine = LookupEngine::new(sources);
    let err = engine.lookup(&root, "194.158.92.200").unwrap_err();
    assert!(err.is_transient());
    assert_eq!(engine.cache_stats().queries.len, 0);

    // A working source behind the empty list succeeds
    let engine = LookupEngine::new(FallbackFetcher::new(Vec::new()).with_source(store));
    assert!(engine.lookup(&root, "194.158.92.200").is_ok());
}

#[test]
fn test_decode_retry_recovers() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine =
        LookupEngine::with_codec(store, FlakyCodec::failing(1), LookupConfig::default()).unwrap();

    let location = engine.lookup(&root, "194.158.92.200").unwrap();
    assert_eq!(location.country_code, "AD");
}

#[test]
fn test_decode_exhausted_after_budget() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine =
        LookupEngine::with_codec(store, FlakyCodec::failing(3), LookupConfig::default()).unwrap();

    match engine.lookup(&root, "194.158.92.200") {
        Err(Error::DecodeExhausted { id, attempts, .. }) => {
            assert_eq!(id, root);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected DecodeExhausted, got {:?}", other),
    }

    // Nothing was cached, so the next call succeeds
    assert!(engine.lookup(&root, "194.158.92.200").is_ok());
}

#[test]
fn test_fetch_exhausted_on_missing_blocks() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);

    // Keep only the root metadata block
    let mut partial = MemoryStore::new();
    partial.insert_unchecked(root, store.get(&root).unwrap().to_vec());
    let engine = LookupEngine::new(partial);

    match engine.lookup(&root, "194.158.92.200") {
        Err(Error::FetchExhausted {
            source: FetchError::NotFound(_),
            attempts: 3,
            ..
        }) => {}
        other => panic!("expected FetchExhausted, got {:?}", other),
    }
}

#[test]
fn test_lookup_pretty_skips_local() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    let pretty = engine
        .lookup_pretty(&root, ["/ip4/127.0.0.1", "/ip4/8.8.8.8"])
        .unwrap();
    assert_eq!(pretty.location.city, "Mountain View");
    assert_eq!(pretty.formatted, "Mountain View, CA, USA, Earth");

    let json = serde_json::to_value(&pretty).unwrap();
    assert_eq!(json["formatted"], "Mountain View, CA, USA, Earth");
    assert_eq!(json["country_code"], "US");
    assert_eq!(json["postal_code"], "94043");
}

#[test]
fn test_lookup_pretty_candidates() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::new(store);

    // Unsupported protocols, private and unmapped addresses are passed over
    let candidates = [
        "/dns4/example.com/tcp/443",
        "/ip6/::1/tcp/4001",
        "/ip4/192.168.1.10/tcp/4001",
        "/ip4/8.8.4.4/tcp/4001",
        "/ip6/2a02:8100::5/udp/4001/quic",
    ];
    let pretty = engine.lookup_pretty(&root, candidates).unwrap();
    assert_eq!(pretty.location.country_code, "PL");
    assert_eq!(pretty.formatted, "Lublin, 06, Poland, Earth");

    assert!(matches!(
        engine.lookup_pretty(&root, ["/ip4/127.0.0.1", "/ip4/10.0.0.1"]),
        Err(Error::UnmappedRange)
    ));
    assert!(matches!(
        engine.lookup_pretty(&root, Vec::<String>::new()),
        Err(Error::UnmappedRange)
    ));
}

#[test]
fn test_lookup_pretty_prefers_country_then_first_partial() {
    init_logger();
    let locations = "\
geoname_id,locale_code,continent_code,continent_name,country_iso_code,country_name,subdivision_1_iso_code,subdivision_1_name,subdivision_2_iso_code,subdivision_2_name,city_name,metro_code,time_zone,is_in_european_union
1,en,,,,,,,,,Alpha,,,0
2,en,,,,,,,,,Beta,,,0
3039163,en,EU,Europe,AD,Andorra,06,,,,Canillo,,Europe/Andorra,0
";
    let blocks = "\
network,geoname_id,registered_country_geoname_id,represented_country_geoname_id,is_anonymous_proxy,is_satellite_provider,postal_code,latitude,longitude,accuracy_radius
1.0.0.0/24,1,,,0,0,,,,100
2.0.0.0/24,2,,,0,0,,,,100
3.0.0.0/24,3039163,,,0,0,,,,100
";
    let mut store = MemoryStore::new();
    let generator = Generator::new(GeneratorConfig::default().with_concurrency(2)).unwrap();
    let root = generator
        .generate(locations.as_bytes(), [blocks.as_bytes()], &mut store)
        .unwrap()
        .root;
    let engine = LookupEngine::new(store);

    let pretty = engine
        .lookup_pretty(&root, ["1.0.0.1", "2.0.0.1", "3.0.0.1"])
        .unwrap();
    assert_eq!(pretty.formatted, "Canillo, 06, Andorra, Earth");

    let pretty = engine.lookup_pretty(&root, ["1.0.0.1", "2.0.0.1"]).unwrap();
    assert_eq!(pretty.location.city, "Alpha");
    assert_eq!(pretty.formatted, "Alpha, Earth");
}

#[test]
fn test_gap_filled_dataset() {
    let mut store = MemoryStore::new();
    let dataset = generate_with(GeneratorConfig::default().with_fill_gaps(true), &mut store);
    assert!(dataset.stats.gap_entries > 0);

    let engine = LookupEngine::new(store);
    assert!(matches!(
        engine.lookup(&dataset.root, "8.8.4.4"),
        Err(Error::UnmappedRange)
    ));
    assert!(matches!(
        engine.lookup(&dataset.root, "0.0.0.1"),
        Err(Error::UnmappedRange)
    ));
    assert_eq!(
        engine.lookup(&dataset.root, "8.8.8.8").unwrap().city,
        "Mountain View"
    );
}

#[test]
fn test_nested_networks_resolve_to_innermost() {
    init_logger();
    let blocks = "\
network,geoname_id,registered_country_geoname_id,represented_country_geoname_id,is_anonymous_proxy,is_satellite_provider,postal_code,latitude,longitude,accuracy_radius
10.0.0.0/16,3039163,,,0,0,,,,100
10.0.1.0/24,765876,,,0,0,,,,100
";
    let mut store = MemoryStore::new();
    let generator = Generator::new(GeneratorConfig::default().with_concurrency(2)).unwrap();
    let dataset = generator
        .generate(LOCATIONS.as_bytes(), [blocks.as_bytes()], &mut store)
        .unwrap();
    assert_eq!(dataset.stats.overlapping_ranges, 1);

    let engine = LookupEngine::new(store);
    for (ip, country) in [
        ("10.0.0.1", "AD"),
        ("10.0.1.0", "PL"),
        ("10.0.1.5", "PL"),
        ("10.0.1.255", "PL"),
        ("10.0.2.0", "AD"),
        ("10.0.2.1", "AD"),
        ("10.0.255.255", "AD"),
    ] {
        assert_eq!(
            engine.lookup(&dataset.root, ip).unwrap().country_code,
            country,
            "{}",
            ip
        );
    }
    assert!(matches!(
        engine.lookup(&dataset.root, "10.1.0.0"),
        Err(Error::UnmappedRange)
    ));
}

#[test]
fn test_concurrent_lookups() {
    let mut store = MemoryStore::new();
    let root = generate(&mut store);
    let engine = LookupEngine::with_config(store, LookupConfig::with_capacity(64)).unwrap();

    let queries = [
        ("194.158.92.200", "AD"),
        ("94.59.56.1", "AE"),
        ("213.195.159.9", "PL"),
        ("2.56.139.77", "US"),
        ("8.8.8.8", "US"),
    ];

    thread::scope(|s| {
        for t in 0..8 {
            let engine = &engine;
            let queries = &queries;
            s.spawn(move || {
                for i in 0..200 {
                    let (ip, code) = queries[(i + t) % queries.len()];
                    assert_eq!(engine.lookup(&root, ip).unwrap().country_code, code);
                }
            });
        }
    });
}

#[test]
fn test_dir_store_with_fallback() {
    let dir = tempdir().unwrap();
    let blocks = dir.path().join("blocks");

    let mut store = DirStore::open(&blocks).unwrap();
    let dataset = generate_with(GeneratorConfig::default(), &mut store);

    let handle_path = dir.path().join("dataset.json");
    DatasetHandle::from_dataset(&dataset).save(&handle_path).unwrap();
    let handle = DatasetHandle::load(&handle_path).unwrap();
    assert_eq!(handle.root, dataset.root);
    assert_eq!(handle.location_count, 5);

    // An empty source first, the directory second
    let fetcher = FallbackFetcher::new(Vec::new())
        .with_source(MemoryStore::new())
        .with_source(DirStore::open(&blocks).unwrap());
    let engine = LookupEngine::new(fetcher);

    let location = engine.lookup(&handle.root, "194.158.92.200").unwrap();
    assert_eq!(location.country_code, "AD");
}

#[test]
fn test_regeneration_reuses_blocks() {
    let mut first = MemoryStore::new();
    let mut second = MemoryStore::new();
    let a = generate_with(GeneratorConfig::default(), &mut first);
    let b = generate_with(GeneratorConfig::default(), &mut second);
    assert_eq!(a.root, b.root);

    // One more range: new root, same location table
    let extra = format!("{}198.51.100.0/24,3039163,3041565,,0,0,,,,1\n", BLOCKS_V4);
    let generator = Generator::new(GeneratorConfig::default().with_concurrency(2)).unwrap();
    let mut third = MemoryStore::new();
    let updated = generator
        .generate(LOCATIONS.as_bytes(), [extra.as_bytes()], &mut third)
        .unwrap();
    assert_ne!(updated.root, a.root);
    assert_eq!(
        updated.metadata.location_table_root,
        a.metadata.location_table_root
    );

    let engine = LookupEngine::new(third);
    assert_eq!(
        engine.lookup(&updated.root, "198.51.100.1").unwrap().country_code,
        "AD"
    );
}
