//! Lifecycle of the hardware offload codec, observed through a mock
//! accelerator that counts every device and producer call.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use blockcodec_codecs::{
    default_registry, register_offload, Accelerator, DeviceStatus, OffloadCodec, OffloadState, ProducerOutcome,
    Sequence, SequenceProducer, ZstdCodec,
};
use blockcodec_core::format::METHOD_ZSTD;
use blockcodec_core::{decode_block, encode_block, Codec, CodecError, CodecRegistry};
use proptest::prelude::*;

#[derive(Default)]
struct Counters {
    device_starts: AtomicUsize,
    producers_created: AtomicUsize,
    producers_released: AtomicUsize,
    blocks_produced: AtomicUsize,
    blocks_declined: AtomicUsize,
}

impl Counters {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// What the mock producer does with a block.
#[derive(Clone, Copy)]
enum Accepts {
    All,
    Nothing,
    AtLeast(usize),
    /// Claims more bytes than the block holds.
    Overrun,
    Panic,
}

struct MockAccelerator {
    counters: Arc<Counters>,
    device_ok: bool,
    accepts: Accepts,
}

impl MockAccelerator {
    fn new(device_ok: bool, accepts: Accepts) -> (Arc<Self>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let accelerator = Arc::new(Self {
            counters: counters.clone(),
            device_ok,
            accepts,
        });
        (accelerator, counters)
    }
}

/// Greedy matcher over four-byte prefixes, standing in for the device.
fn greedy_parse(source: &[u8], window_size: usize, sequences: &mut Vec<Sequence>) {
    let mut last_seen: HashMap<[u8; 4], usize> = HashMap::new();
    let mut anchor = 0;
    let mut pos = 0;
    while pos + 4 <= source.len() {
        let key = [source[pos], source[pos + 1], source[pos + 2], source[pos + 3]];
        if let Some(prev) = last_seen.insert(key, pos) {
            let offset = pos - prev;
            if offset <= window_size {
                let mut len = 4;
                while pos + len < source.len() && source[prev + len] == source[pos + len] {
                    len += 1;
                }
                sequences.push(Sequence::new((pos - anchor) as u32, len as u32, offset as u32));
                pos += len;
                anchor = pos;
                continue;
            }
        }
        pos += 1;
    }
    if anchor < source.len() {
        sequences.push(Sequence::literals((source.len() - anchor) as u32));
    }
}

struct MockProducer {
    counters: Arc<Counters>,
    accepts: Accepts,
}

impl SequenceProducer for MockProducer {
    fn produce(&mut self, source: &[u8], window_size: usize, sequences: &mut Vec<Sequence>) -> ProducerOutcome {
        let accept = match self.accepts {
            Accepts::All | Accepts::Overrun | Accepts::Panic => true,
            Accepts::Nothing => false,
            Accepts::AtLeast(min) => source.len() >= min,
        };
        if !accept {
            self.counters.blocks_declined.fetch_add(1, Ordering::SeqCst);
            return ProducerOutcome::Declined;
        }
        self.counters.blocks_produced.fetch_add(1, Ordering::SeqCst);
        match self.accepts {
            Accepts::Overrun => sequences.push(Sequence::literals(source.len() as u32 + 100)),
            Accepts::Panic => panic!("device fault"),
            _ => greedy_parse(source, window_size, sequences),
        }
        ProducerOutcome::Produced
    }
}

impl Drop for MockProducer {
    fn drop(&mut self) {
        self.counters.producers_released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Accelerator for MockAccelerator {
    fn name(&self) -> &str {
        "mock"
    }

    fn start_device(&self) -> Result<(), DeviceStatus> {
        self.counters.device_starts.fetch_add(1, Ordering::SeqCst);
        if self.device_ok {
            Ok(())
        } else {
            Err(DeviceStatus {
                code: -2,
                message: "mock device offline".into(),
            })
        }
    }

    fn create_producer(&self) -> Box<dyn SequenceProducer> {
        self.counters.producers_created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockProducer {
            counters: self.counters.clone(),
            accepts: self.accepts,
        })
    }
}

fn sample(len: usize) -> Vec<u8> {
    let words: [&[u8]; 4] = [b"alpha ", b"beta ", b"gamma ", b"delta "];
    words.iter().cycle().flat_map(|w| w.iter().copied()).take(len).collect()
}

#[test]
fn context_is_created_once_across_sequential_calls() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::All);
    let codec = OffloadCodec::from_args(&[5], accelerator).unwrap();

    assert_eq!(Counters::get(&counters.device_starts), 0, "nothing happens before first use");
    assert_eq!(codec.state(), OffloadState::Uninitialized);

    let data = sample(64 * 1024);
    let first = codec.compress_to_vec(&data).unwrap();
    let second = codec.compress_to_vec(&data).unwrap();

    assert_eq!(Counters::get(&counters.device_starts), 1);
    assert_eq!(Counters::get(&counters.producers_created), 1);
    assert!(Counters::get(&counters.blocks_produced) >= 2);
    assert_eq!(codec.state(), OffloadState::Ready { device_started: true });
    assert_eq!(first, second);
    assert_eq!(codec.decompress_to_vec(&first, data.len()).unwrap(), data);
}

#[test]
fn concurrent_first_use_initializes_exactly_once() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::All);
    let codec = Arc::new(OffloadCodec::from_args(&[3], accelerator).unwrap());
    let data = Arc::new(sample(16 * 1024));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let codec = codec.clone();
            let data = data.clone();
            thread::spawn(move || {
                let compressed = codec.compress_to_vec(&data).unwrap();
                codec.decompress_to_vec(&compressed, data.len()).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), *data);
    }

    assert_eq!(Counters::get(&counters.device_starts), 1);
    assert_eq!(Counters::get(&counters.producers_created), 1);
    assert!(Counters::get(&counters.blocks_produced) >= 8);
}

#[test]
fn unused_codec_releases_nothing() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::All);
    let codec = OffloadCodec::from_args(&[], accelerator).unwrap();

    // decompression never touches the accelerator
    let compressed = ZstdCodec::default().compress_to_vec(b"software written").unwrap();
    assert_eq!(codec.decompress_to_vec(&compressed, 16).unwrap(), b"software written");
    drop(codec);

    assert_eq!(Counters::get(&counters.device_starts), 0);
    assert_eq!(Counters::get(&counters.producers_created), 0);
    assert_eq!(Counters::get(&counters.producers_released), 0);
}

#[test]
fn used_codec_releases_producer_exactly_once() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::All);
    let codec = OffloadCodec::from_args(&[1], accelerator).unwrap();
    codec.compress_to_vec(&sample(1000)).unwrap();
    codec.compress_to_vec(&sample(2000)).unwrap();
    assert_eq!(Counters::get(&counters.producers_released), 0);

    drop(codec);
    assert_eq!(Counters::get(&counters.producers_released), 1);
}

#[test]
fn device_start_failure_is_not_fatal() {
    let (accelerator, counters) = MockAccelerator::new(false, Accepts::Nothing);
    let codec = OffloadCodec::from_args(&[4], accelerator).unwrap();

    let data = sample(32 * 1024);
    let compressed = codec.compress_to_vec(&data).unwrap();
    assert_eq!(codec.state(), OffloadState::Ready { device_started: false });
    assert!(Counters::get(&counters.blocks_declined) >= 1);
    assert_eq!(Counters::get(&counters.blocks_produced), 0);

    codec.compress_to_vec(&data).unwrap();
    assert_eq!(Counters::get(&counters.device_starts), 1, "no retry of a failed device start");

    // fallback output is ordinary ZSTD
    let plain = ZstdCodec::default();
    assert_eq!(plain.decompress_to_vec(&compressed, data.len()).unwrap(), data);
}

#[test]
fn fallback_applies_per_block() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::AtLeast(4096));
    let codec = OffloadCodec::from_args(&[6], accelerator).unwrap();

    for len in [100, 8192, 10, 4096, 0] {
        let data = sample(len);
        let compressed = codec.compress_to_vec(&data).unwrap();
        assert_eq!(codec.decompress_to_vec(&compressed, len).unwrap(), data);
    }
    assert!(Counters::get(&counters.blocks_produced) >= 1);
    assert!(Counters::get(&counters.blocks_declined) >= 1);
    assert_eq!(Counters::get(&counters.device_starts), 1);
}

#[test]
fn failed_call_leaves_codec_reusable() {
    let (accelerator, _counters) = MockAccelerator::new(true, Accepts::Nothing);
    let codec = OffloadCodec::from_args(&[2], accelerator).unwrap();

    let mut tiny = [0u8; 1];
    let err = codec.compress(&sample(512), &mut tiny).unwrap_err();
    assert!(matches!(err, CodecError::Compression { .. }), "{err}");

    let data = sample(512);
    let compressed = codec.compress_to_vec(&data).unwrap();
    assert_eq!(codec.decompress_to_vec(&compressed, data.len()).unwrap(), data);
}

#[test]
fn blocks_decode_through_zstd_method_byte() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::All);
    let mut registry = CodecRegistry::new();
    blockcodec_codecs::register_zstd(&mut registry).unwrap();
    register_offload(&mut registry, accelerator).unwrap();

    let codec = registry.get_by_text("QATZSTD(7)").unwrap();
    assert_eq!(codec.method_byte(), METHOD_ZSTD);

    let data = sample(100_000);
    let frame = encode_block(codec.as_ref(), &data).unwrap();
    assert_eq!(decode_block(&registry, &frame).unwrap(), data);
    assert_eq!(registry.get_by_method(METHOD_ZSTD).unwrap().name(), "ZSTD");
    assert_eq!(Counters::get(&counters.device_starts), 1);
}

#[test]
fn default_registry_offload_runs_without_device() {
    let registry = default_registry().unwrap();
    let codec = registry.get_by_text("QATZSTD").unwrap();
    let data = sample(10_000);
    let compressed = codec.compress_to_vec(&data).unwrap();
    assert_eq!(codec.decompress_to_vec(&compressed, data.len()).unwrap(), data);

    assert!(matches!(
        registry.get_by_text("QATZSTD(13)"),
        Err(CodecError::ParameterOutOfRange { .. })
    ));
    assert!(matches!(registry.get_by_text("QATZSTD(3, 27)"), Err(CodecError::Syntax(_))));
}

#[test]
fn accelerated_parse_is_used_and_compresses() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::All);
    let codec = OffloadCodec::from_args(&[3], accelerator).unwrap();

    let data = sample(100_000);
    let compressed = codec.compress_to_vec(&data).unwrap();
    assert!(Counters::get(&counters.blocks_produced) >= 1);
    assert!(compressed.len() < data.len() / 10, "{} bytes", compressed.len());
    assert_eq!(ZstdCodec::default().decompress_to_vec(&compressed, data.len()).unwrap(), data);
}

#[test]
fn overrunning_parse_falls_back_within_bound() {
    let (accelerator, counters) = MockAccelerator::new(true, Accepts::Overrun);
    let codec = OffloadCodec::from_args(&[3], accelerator).unwrap();

    for len in [1000, 64 * 1024] {
        let data = sample(len);
        let bound = codec.max_compressed_size(len);
        let mut dest = vec![0u8; bound];
        let written = codec.compress(&data, &mut dest).unwrap();
        assert!(written <= bound);

        let frame = encode_block(&codec, &data).unwrap();
        let mut registry = CodecRegistry::new();
        blockcodec_codecs::register_zstd(&mut registry).unwrap();
        assert_eq!(decode_block(&registry, &frame).unwrap(), data);
    }
    assert!(Counters::get(&counters.blocks_produced) >= 2);
}

#[test]
fn panicking_producer_falls_back() {
    let (accelerator, _counters) = MockAccelerator::new(true, Accepts::Panic);
    let codec = OffloadCodec::from_args(&[2], accelerator).unwrap();

    let data = sample(20_000);
    let compressed = codec.compress_to_vec(&data).unwrap();
    assert_eq!(codec.decompress_to_vec(&compressed, data.len()).unwrap(), data);
}

fn offload_input() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..16 * 1024),
        proptest::collection::vec(0u8..4, 0..200 * 1024),
        (0usize..150 * 1024).prop_map(sample),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn offload_round_trips_within_bound(level in 1u64..=12, data in offload_input()) {
        let (accelerator, _counters) = MockAccelerator::new(true, Accepts::All);
        let codec = OffloadCodec::from_args(&[level], accelerator).unwrap();

        let bound = codec.max_compressed_size(data.len());
        let mut dest = vec![0u8; bound];
        let written = codec.compress(&data, &mut dest).unwrap();
        prop_assert!(written <= bound);
        prop_assert_eq!(ZstdCodec::default().decompress_to_vec(&dest[..written], data.len()).unwrap(), data);
    }
}
