use crate::stamp::{TimeOfDay, STAMP_LEN};

/// First signature byte: the trace-box message id.
pub const SIGNATURE_MESSAGE_ID: u8 = 0x94;
/// Second signature byte: the vendor master.
pub const SIGNATURE_MASTER: u8 = 0x01;
/// Trace type carried by every heap-hook record.
pub const HEAP_TRACE_TYPE: u8 = 0x04;

const ID_HEAP_ALLOC: u8 = 0x40;
const ID_HEAP_DEALLOC: u8 = 0x42;
const ID_HEAP_ALLOC_NO_WAIT: u8 = 0x76;
const ID_HEAP_COND_ALLOC: u8 = 0x77;
const ID_HEAP_INIT: u8 = 0x79;
const ID_HEAP_ALLOC_NO_WAIT_FROM: u8 = 0x84;
const ID_ALIGNED_ALLOC_NO_WAIT: u8 = 0x8A;
const ID_ALIGNED_ALLOC: u8 = 0x8B;

/// Bytes between the signature pair and the variant tail:
/// channel, stamp, trace type, record id, task and pointer.
pub const HEAP_HEADER_LEN: usize = 1 + STAMP_LEN + 1 + 1 + 2 + 4;

/// Which allocator entry point produced an allocation. It only tags the
/// record; heap accounting treats all of them alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocKind {
    Plain,
    NoWait,
    Conditional,
    AlignedNoWait,
    Aligned,
    NoWaitFrom,
}

impl AllocKind {
    pub const ALL: [AllocKind; 6] = [
        AllocKind::Plain,
        AllocKind::NoWait,
        AllocKind::Conditional,
        AllocKind::AlignedNoWait,
        AllocKind::Aligned,
        AllocKind::NoWaitFrom,
    ];

    /// Code used in the intermediate line format.
    pub fn code(&self) -> u8 {
        match self {
            AllocKind::Plain            => { 1 },
            AllocKind::NoWait           => { 2 },
            AllocKind::Conditional      => { 3 },
            AllocKind::AlignedNoWait    => { 4 },
            AllocKind::Aligned          => { 5 },
            AllocKind::NoWaitFrom       => { 6 },
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter()
            .copied()
            .find(|k| k.code() == code)
    }

    fn record_id(&self) -> u8 {
        match self {
            AllocKind::Plain            => { ID_HEAP_ALLOC },
            AllocKind::NoWait           => { ID_HEAP_ALLOC_NO_WAIT },
            AllocKind::Conditional      => { ID_HEAP_COND_ALLOC },
            AllocKind::AlignedNoWait    => { ID_ALIGNED_ALLOC_NO_WAIT },
            AllocKind::Aligned          => { ID_ALIGNED_ALLOC },
            AllocKind::NoWaitFrom       => { ID_HEAP_ALLOC_NO_WAIT_FROM },
        }
    }

    // Tail layout: size first, then an optional extra field, then the
    // two callers. Returns (tail length, offset of caller1).
    fn layout(&self) -> (usize, usize) {
        match self {
            AllocKind::Plain | AllocKind::NoWait    => { (12, 4) },
            // Low-water mark, or block alignment.
            AllocKind::Conditional |
            AllocKind::AlignedNoWait |
            AllocKind::Aligned                      => { (16, 8) },
            // Two-byte heap id.
            AllocKind::NoWaitFrom                   => { (14, 6) },
        }
    }
}

/// The record-id byte of a heap record, narrowed to the ones we decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordId {
    Init,
    Deallocate,
    Allocate(AllocKind),
}

impl RecordId {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            ID_HEAP_INIT    => Some(RecordId::Init),
            ID_HEAP_DEALLOC => Some(RecordId::Deallocate),
            _               => {
                AllocKind::ALL.iter()
                    .copied()
                    .find(|k| k.record_id() == b)
                    .map(RecordId::Allocate)
            }
        }
    }

    pub fn byte(&self) -> u8 {
        match self {
            RecordId::Init          => { ID_HEAP_INIT },
            RecordId::Deallocate    => { ID_HEAP_DEALLOC },
            RecordId::Allocate(k)   => { k.record_id() },
        }
    }

    /// Bytes following the common heap header.
    pub fn tail_len(&self) -> usize {
        match self {
            RecordId::Init          => { 0 },
            RecordId::Deallocate    => { 8 },
            RecordId::Allocate(k)   => { k.layout().0 },
        }
    }
}

/// The common part of every heap record, decoded field by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapHeader {
    pub channel:    u8,
    pub stamp:      [u8; STAMP_LEN],
    pub trace_type: u8,
    pub record_id:  u8,
    pub task:       u16,
    pub ptr:        u32,
}

impl HeapHeader {
    /// `b` must hold at least [`HEAP_HEADER_LEN`] bytes.
    pub fn parse(b: &[u8]) -> Self {
        let mut stamp = [0u8; STAMP_LEN];
        stamp.copy_from_slice(&b[1..1 + STAMP_LEN]);

        Self {
            channel:    b[0],
            stamp,
            trace_type: b[9],
            record_id:  b[10],
            task:       u16::from_be_bytes([b[11], b[12]]),
            ptr:        be_u32(b, 13),
        }
    }
}

#[inline]
fn be_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// What a heap record says happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    /// The heap was (re)initialized.
    Init,
    Allocate {
        address:    u32,
        size:       u32,
        subtype:    AllocKind,
        caller1:    u32,
        caller2:    u32,
    },
    Deallocate {
        address:    u32,
        caller1:    u32,
        caller2:    u32,
    },
}

/// One decoded heap event. Immutable once produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub time:   TimeOfDay,
    pub kind:   RecordKind,
}

impl TraceRecord {
    /// Builds a record out of its header and tail. `tail` must hold at
    /// least `id.tail_len()` bytes.
    pub fn from_parts(id: RecordId, header: &HeapHeader, tail: &[u8]) -> Self {
        let kind = match id {
            RecordId::Init          => { RecordKind::Init },
            RecordId::Deallocate    => {
                RecordKind::Deallocate {
                    address:    header.ptr,
                    caller1:    be_u32(tail, 0),
                    caller2:    be_u32(tail, 4),
                }
            },
            RecordId::Allocate(k)   => {
                let (_, callers_at) = k.layout();
                RecordKind::Allocate {
                    address:    header.ptr,
                    size:       be_u32(tail, 0),
                    subtype:    k,
                    caller1:    be_u32(tail, callers_at),
                    caller2:    be_u32(tail, callers_at + 4),
                }
            },
        };

        Self {
            time: TimeOfDay::from_stamp(header.stamp),
            kind,
        }
    }

    pub fn record_id(&self) -> RecordId {
        match self.kind {
            RecordKind::Init                    => { RecordId::Init },
            RecordKind::Deallocate { .. }       => { RecordId::Deallocate },
            RecordKind::Allocate { subtype, .. }=> { RecordId::Allocate(subtype) },
        }
    }

    /// Heap block address. Meaningless (zero) for `Init`.
    pub fn address(&self) -> u32 {
        match self.kind {
            RecordKind::Init                        => { 0 },
            RecordKind::Allocate { address, .. }    => { address },
            RecordKind::Deallocate { address, .. }  => { address },
        }
    }

    /// Requested size; only allocations have one.
    pub fn size(&self) -> u32 {
        if let RecordKind::Allocate { size, .. } = self.kind { size } else { 0 }
    }

    pub fn subtype(&self) -> Option<AllocKind> {
        if let RecordKind::Allocate { subtype, .. } = self.kind { Some(subtype) } else { None }
    }

    pub fn callers(&self) -> (u32, u32) {
        match self.kind {
            RecordKind::Init                                    => { (0, 0) },
            RecordKind::Allocate { caller1, caller2, .. }       => { (caller1, caller2) },
            RecordKind::Deallocate { caller1, caller2, .. }     => { (caller1, caller2) },
        }
    }

    /// Serializes the record the way the hooks emit it, starting right
    /// after the signature pair. Extra tail fields are written as zero.
    pub fn to_heap_bytes(&self) -> Vec<u8> {
        let id = self.record_id();
        let mut res = Vec::with_capacity(HEAP_HEADER_LEN + id.tail_len());
        res.push(0);
        res.extend_from_slice(&self.time.to_stamp());
        res.push(HEAP_TRACE_TYPE);
        res.push(id.byte());
        res.extend_from_slice(&[0, 0]);
        res.extend_from_slice(&self.address().to_be_bytes());

        let mut tail = vec![0u8; id.tail_len()];
        let (caller1, caller2) = self.callers();
        let callers_at = match self.kind {
            RecordKind::Init                => { return res; },
            RecordKind::Deallocate { .. }   => { 0 },
            RecordKind::Allocate { size, subtype, .. }  => {
                tail[..4].copy_from_slice(&size.to_be_bytes());
                subtype.layout().1
            },
        };
        tail[callers_at..callers_at + 4].copy_from_slice(&caller1.to_be_bytes());
        tail[callers_at + 4..callers_at + 8].copy_from_slice(&caller2.to_be_bytes());
        res.append(&mut tail);

        res
    }
}
