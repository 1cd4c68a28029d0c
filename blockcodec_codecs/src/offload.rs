//! ZSTD with match finding offloaded to a hardware accelerator.
//!
//! The accelerator is registered on a libzstd compression context as its
//! block-level sequence producer: it parses each block into sequences and
//! libzstd does the entropy coding, so the output is always a regular ZSTD
//! frame. Blocks the accelerator declines, or parses it gets wrong, are
//! handed back to libzstd's own match finder for that block only.
//!
//! The context is acquired on the first `compress` call and released when
//! the codec is dropped. Decompression always runs on the software path.

use std::ffi::{c_int, c_void};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

use blockcodec_core::{Codec, CodecDescriptor, CodecError, CodecPtr, CodecRegistry, ParamRules, Result};
use tracing::{debug, info, trace, warn};
use zstd_sys::{ZSTD_ParamSwitch_e, ZSTD_cParameter};

use crate::zstd_codec::{ZstdBackend, ZstdCodec, ZSTD_DEFAULT_LEVEL};

pub const OFFLOAD_CODEC_NAME: &str = "QATZSTD";

pub const OFFLOAD_MIN_LEVEL: i64 = 1;
pub const OFFLOAD_MAX_LEVEL: i64 = 12;

/// Shortest match libzstd accepts in a sequence (`ZSTD_MINMATCH_MIN`).
pub const MIN_MATCH_LEN: u32 = 3;

/// `ZSTD_c_enableSeqProducerFallback`
const ENABLE_SEQ_PRODUCER_FALLBACK: ZSTD_cParameter = ZSTD_cParameter::ZSTD_c_experimentalParam17;

/// `ZSTD_SEQUENCE_PRODUCER_ERROR`
const SEQUENCE_PRODUCER_ERROR: usize = usize::MAX;

/// Error status reported by an accelerator whose device did not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// One step of a block parse: `literal_length` literal bytes followed by a
/// copy of `match_length` bytes starting `offset` bytes back.
///
/// A parse may end with a literals-only sequence (`match_length` and
/// `offset` both zero).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sequence {
    pub literal_length: u32,
    pub match_length: u32,
    pub offset: u32,
}

impl Sequence {
    pub fn new(literal_length: u32, match_length: u32, offset: u32) -> Self {
        Self {
            literal_length,
            match_length,
            offset,
        }
    }

    pub fn literals(literal_length: u32) -> Self {
        Self::new(literal_length, 0, 0)
    }
}

/// Result of handing one block to a sequence producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// The block was parsed into the sequence buffer.
    Produced,
    /// The producer could not handle this block.
    Declined,
}

/// Accelerator-side state bound to one compression context.
///
/// Dropping the producer frees that state.
pub trait SequenceProducer: Send {
    /// Parse one block of `source` into `sequences` (which arrives empty).
    ///
    /// Offsets may not reach before the start of `source` nor further back
    /// than `window_size`. A parse that breaks these rules is discarded and
    /// the block is compressed in software.
    fn produce(&mut self, source: &[u8], window_size: usize, sequences: &mut Vec<Sequence>) -> ProducerOutcome;
}

/// A compression accelerator device.
pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;

    /// Start the device. May be called at any time before the first job.
    fn start_device(&self) -> std::result::Result<(), DeviceStatus>;

    /// Allocate producer state for one compression context.
    fn create_producer(&self) -> Box<dyn SequenceProducer>;
}

/// Accelerator for hosts without a device: it never starts and declines
/// every block, so compression runs entirely on the software fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevice;

struct DecliningProducer;

impl SequenceProducer for DecliningProducer {
    fn produce(&mut self, _source: &[u8], _window_size: usize, _sequences: &mut Vec<Sequence>) -> ProducerOutcome {
        ProducerOutcome::Declined
    }
}

impl Accelerator for NoDevice {
    fn name(&self) -> &str {
        "none"
    }

    fn start_device(&self) -> std::result::Result<(), DeviceStatus> {
        Err(DeviceStatus {
            code: -1,
            message: "no accelerator device present".into(),
        })
    }

    fn create_producer(&self) -> Box<dyn SequenceProducer> {
        Box::new(DecliningProducer)
    }
}

/// Check that `sequences` is a parse libzstd can encode for a block of
/// `source_len` bytes with no history before it.
pub fn check_parse(sequences: &[Sequence], source_len: usize, window_size: usize) -> std::result::Result<(), String> {
    if source_len > 0 && sequences.is_empty() {
        return Err("no sequences for a non-empty block".into());
    }
    let mut position = 0usize;
    for (idx, seq) in sequences.iter().enumerate() {
        position = position.saturating_add(seq.literal_length as usize);
        if seq.match_length == 0 {
            if seq.offset != 0 || idx + 1 != sequences.len() {
                return Err(format!("sequence {idx} is an empty match before the end of the block"));
            }
            continue;
        }
        if seq.match_length < MIN_MATCH_LEN {
            return Err(format!("sequence {idx} has a {}-byte match", seq.match_length));
        }
        let offset = seq.offset as usize;
        if offset == 0 || offset > position || offset > window_size {
            return Err(format!("sequence {idx} has offset {offset} at position {position}"));
        }
        position = position.saturating_add(seq.match_length as usize);
    }
    if position != source_len {
        return Err(format!("parse covers {position} bytes of a {source_len}-byte block"));
    }
    Ok(())
}

/// Producer plus its reusable sequence buffer; libzstd holds a pointer to
/// this while it is registered.
struct ProducerSlot {
    producer: Box<dyn SequenceProducer>,
    sequences: Vec<Sequence>,
}

impl ProducerSlot {
    fn fill(&mut self, source: &[u8], window_size: usize) -> bool {
        self.sequences.clear();
        match self.producer.produce(source, window_size, &mut self.sequences) {
            ProducerOutcome::Produced => match check_parse(&self.sequences, source.len(), window_size) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(len = source.len(), %reason, "discarding accelerator parse, compressing block in software");
                    false
                }
            },
            ProducerOutcome::Declined => {
                trace!(len = source.len(), "accelerator declined block, compressing in software");
                false
            }
        }
    }
}

/// `ZSTD_sequenceProducer_F` over a [`ProducerSlot`].
unsafe extern "C" fn produce_sequences(
    state: *mut c_void,
    out_seqs: *mut zstd_sys::ZSTD_Sequence,
    out_capacity: usize,
    src: *const c_void,
    src_size: usize,
    _dict: *const c_void,
    _dict_size: usize,
    _level: c_int,
    window_size: usize,
) -> usize {
    // SAFETY: `state` is the slot registered in `HardwareContext::acquire`;
    // libzstd only calls back from inside `ZSTD_compress2` on that context,
    // which runs under the codec's lock.
    let slot = unsafe { &mut *state.cast::<ProducerSlot>() };
    let source = if src_size == 0 {
        &[][..]
    } else {
        // SAFETY: libzstd passes a readable block of `src_size` bytes.
        unsafe { std::slice::from_raw_parts(src.cast::<u8>(), src_size) }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| slot.fill(source, window_size))) {
        Ok(true) => {}
        Ok(false) => return SEQUENCE_PRODUCER_ERROR,
        Err(_) => {
            warn!(len = src_size, "accelerator producer panicked, compressing block in software");
            return SEQUENCE_PRODUCER_ERROR;
        }
    }

    let count = slot.sequences.len();
    if count > out_capacity {
        debug!(count, out_capacity, "accelerator parse exceeds sequence capacity");
        return SEQUENCE_PRODUCER_ERROR;
    }
    // SAFETY: libzstd provides room for `out_capacity` sequences.
    let out = unsafe { std::slice::from_raw_parts_mut(out_seqs, count) };
    for (dst, seq) in out.iter_mut().zip(&slot.sequences) {
        *dst = zstd_sys::ZSTD_Sequence {
            offset: seq.offset,
            litLength: seq.literal_length,
            matchLength: seq.match_length,
            rep: 0,
        };
    }
    count
}

fn check_zstd(code: usize) -> Result<usize> {
    // SAFETY: pure query on a return code.
    if unsafe { zstd_sys::ZSTD_isError(code) } != 0 {
        return Err(CodecError::compression(OFFLOAD_CODEC_NAME, zstd_safe::get_error_name(code)));
    }
    Ok(code)
}

/// Owned `ZSTD_CCtx`. `zstd_safe::CCtx` does not expose its pointer, which
/// sequence producer registration needs.
struct RawContext(NonNull<zstd_sys::ZSTD_CCtx>);

// SAFETY: a ZSTD_CCtx has no thread affinity; it is only used by whoever
// holds the codec's lock.
unsafe impl Send for RawContext {}

impl RawContext {
    fn create() -> Result<Self> {
        // SAFETY: plain allocation; null is handled below.
        let ptr = unsafe { zstd_sys::ZSTD_createCCtx() };
        NonNull::new(ptr)
            .map(Self)
            .ok_or_else(|| CodecError::compression(OFFLOAD_CODEC_NAME, "cannot allocate compression context"))
    }

    fn set(&mut self, param: ZSTD_cParameter, value: c_int) -> Result<()> {
        // SAFETY: `self.0` is a live context.
        check_zstd(unsafe { zstd_sys::ZSTD_CCtx_setParameter(self.0.as_ptr(), param, value) }).map(|_| ())
    }

    fn compress(&mut self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
        // SAFETY: both buffers are valid for the lengths passed; libzstd
        // never writes past `dest.len()`.
        check_zstd(unsafe {
            zstd_sys::ZSTD_compress2(
                self.0.as_ptr(),
                dest.as_mut_ptr().cast(),
                dest.len(),
                source.as_ptr().cast(),
                source.len(),
            )
        })
    }
}

impl Drop for RawContext {
    fn drop(&mut self) {
        // SAFETY: owned pointer, freed exactly once.
        unsafe {
            zstd_sys::ZSTD_freeCCtx(self.0.as_ptr());
        }
    }
}

/// Heap-pinned [`ProducerSlot`] whose address is handed to libzstd.
struct ProducerHandle(NonNull<ProducerSlot>);

// SAFETY: the slot holds a `Send` producer and a `Vec`; it is only touched
// from inside compression calls made under the codec's lock.
unsafe impl Send for ProducerHandle {}

impl ProducerHandle {
    fn new(producer: Box<dyn SequenceProducer>) -> Self {
        let slot = Box::new(ProducerSlot {
            producer,
            sequences: Vec::new(),
        });
        Self(NonNull::from(Box::leak(slot)))
    }

    fn as_state(&self) -> *mut c_void {
        self.0.as_ptr().cast()
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        // SAFETY: created from `Box::leak` in `new` and freed only here.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// Compression context plus the producer registered on it.
///
/// Field order is drop order: producer state is freed before the context.
struct HardwareContext {
    producer: ProducerHandle,
    cctx: RawContext,
    device_started: bool,
}

impl HardwareContext {
    /// Anything allocated before a failing step is released on return.
    fn acquire(accelerator: &dyn Accelerator, level: i32) -> Result<Self> {
        let mut cctx = RawContext::create()?;

        let device_started = match accelerator.start_device() {
            Ok(()) => {
                info!(accelerator = accelerator.name(), "hardware-assisted ZSTD codec initialized");
                true
            }
            Err(status) => {
                warn!(
                    accelerator = accelerator.name(),
                    %status,
                    "hardware-assisted ZSTD codec initialized without a device; blocks fall back to software"
                );
                false
            }
        };

        let producer = ProducerHandle::new(accelerator.create_producer());
        // SAFETY: the slot outlives every compression on `cctx`; both end up
        // in the same HardwareContext and the context is never used once the
        // slot is gone.
        unsafe {
            zstd_sys::ZSTD_registerSequenceProducer(cctx.0.as_ptr(), producer.as_state(), Some(produce_sequences));
        }
        cctx.set(ENABLE_SEQ_PRODUCER_FALLBACK, 1)?;
        // external producers cannot run alongside long-distance matching
        cctx.set(
            ZSTD_cParameter::ZSTD_c_enableLongDistanceMatching,
            ZSTD_ParamSwitch_e::ZSTD_ps_disable as c_int,
        )?;
        cctx.set(ZSTD_cParameter::ZSTD_c_compressionLevel, level)?;

        Ok(HardwareContext {
            producer,
            cctx,
            device_started,
        })
    }

    fn compress(&mut self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
        self.cctx.compress(source, dest)
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        debug!("releasing hardware compression context");
    }
}

enum ContextState {
    Uninitialized,
    Ready(HardwareContext),
}

/// Lifecycle of the accelerator context as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadState {
    Uninitialized,
    Ready { device_started: bool },
}

/// ZSTD codec whose match finding runs through an [`Accelerator`].
///
/// Wraps a baseline [`ZstdCodec`]: the method byte, size bound and the whole
/// decompression path are the baseline's, so blocks written here decode
/// with plain ZSTD. The accelerator context is created once, under a lock,
/// by whichever `compress` call comes first; concurrent callers wait for it
/// and then take turns on the single context.
pub struct OffloadCodec {
    baseline: ZstdCodec,
    accelerator: Arc<dyn Accelerator>,
    context: Mutex<ContextState>,
    descriptor: CodecDescriptor,
}

impl OffloadCodec {
    /// `level` is not range-checked here; use [`OffloadCodec::from_args`]
    /// for descriptor input.
    pub fn new(level: i32, accelerator: Arc<dyn Accelerator>) -> Self {
        let baseline = ZstdCodec::new(level);
        let descriptor = CodecDescriptor::new(OFFLOAD_CODEC_NAME, baseline.method_byte(), vec![level as u64]);
        Self {
            baseline,
            accelerator,
            context: Mutex::new(ContextState::Uninitialized),
            descriptor,
        }
    }

    /// `()` or `(level)` with level in the accelerator's supported range.
    pub fn from_args(args: &[u64], accelerator: Arc<dyn Accelerator>) -> Result<Self> {
        let params = ParamRules::level_only(ZSTD_DEFAULT_LEVEL)
            .with_level_range(OFFLOAD_MIN_LEVEL..=OFFLOAD_MAX_LEVEL)
            .validate(OFFLOAD_CODEC_NAME, args, &ZstdBackend)?;
        Ok(Self::new(params.level.get(), accelerator))
    }

    pub fn level(&self) -> i32 {
        self.baseline.level()
    }

    pub fn state(&self) -> OffloadState {
        match &*self.context.lock().unwrap_or_else(PoisonError::into_inner) {
            ContextState::Uninitialized => OffloadState::Uninitialized,
            ContextState::Ready(ctx) => OffloadState::Ready {
                device_started: ctx.device_started,
            },
        }
    }
}

impl fmt::Debug for OffloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadCodec")
            .field("descriptor", &self.descriptor)
            .field("accelerator", &self.accelerator.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Codec for OffloadCodec {
    fn method_byte(&self) -> u8 {
        self.baseline.method_byte()
    }

    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        self.baseline.max_compressed_size(source_size)
    }

    fn compress(&self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
        let mut state = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        if let ContextState::Uninitialized = *state {
            *state = ContextState::Ready(HardwareContext::acquire(self.accelerator.as_ref(), self.level())?);
        }
        match &mut *state {
            ContextState::Ready(ctx) => ctx.compress(source, dest),
            ContextState::Uninitialized => Err(CodecError::compression(
                OFFLOAD_CODEC_NAME,
                "hardware context missing after initialization",
            )),
        }
    }

    fn decompress(&self, source: &[u8], dest: &mut [u8]) -> Result<()> {
        self.baseline.decompress(source, dest)
    }
}

/// Register the offload codec by name only; its blocks carry ZSTD's byte.
pub fn register_offload(registry: &mut CodecRegistry, accelerator: Arc<dyn Accelerator>) -> Result<()> {
    registry.register(OFFLOAD_CODEC_NAME, None, move |args| {
        let codec: CodecPtr = Arc::new(OffloadCodec::from_args(args, accelerator.clone())?);
        Ok(codec)
    })
}
