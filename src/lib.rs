//! MXF (Material eXchange Format) container I/O
//!
//! This crate reads and writes MXF files (SMPTE 377 family): KLV-framed
//! containers used for professional video interchange in broadcast,
//! post-production and archival workflows.
//!
//! # Features
//!
//! - Streaming KLV access with chunked value reads, sized for files far
//!   larger than memory
//! - Partition parsing and writing, including KAG alignment and
//!   KLV-Fill handling
//! - Header metadata as a typed object graph with strong/weak reference
//!   resolution across forward declarations
//! - Primer pack management with deterministic tag assignment
//! - Index table segment decode/encode and edit-unit lookup
//! - Random index pack and run-in support at the file level
//!
//! # Example
//!
//! ```no_run
//! use mxfio::{MxfSession, StaticRegistry, LogSink};
//!
//! let mut session = MxfSession::open("video.mxf").unwrap();
//! println!("partitions: {}", session.partitions().len());
//!
//! let registry = StaticRegistry::baseline();
//! let mut sink = LogSink;
//! if let Some(header) = session.partitions_mut().first_mut() {
//!     header.read_metadata(&registry, &mut sink).unwrap();
//!     println!("top-level sets: {}", header.top_level_metadata().len());
//! }
//! ```

mod codec;
mod diag;
mod error;
mod file;
mod index;
mod klv;
mod metadata;
mod partition;
mod primer;
mod registry;
mod resolve;
mod session;
mod types;
mod ul;

pub use codec::{
    ber_length_size, decode_ber_length, encode_ber_length, encode_ber_length_exact,
    read_ber_length, MAX_LENGTH,
};
pub use diag::{CollectSink, DiagnosticSink, LogSink};
pub use error::{MxfError, Result};
pub use file::{FileRef, MxfFile, Position, RandomAccess, SharedBuffer, MAX_RUN_IN,
    UNKNOWN_POSITION};
pub use index::{DeltaEntry, IndexEntry, IndexTable, IndexTableSegment};
pub use klv::{
    fill_size_for, write_fill, KeyFormat, KlvCursor, KlvIdentity, KlvInfo, KlvItem,
    KlvReadHandler, LenFormat, ReadHandlerRef, READ_ALL,
};
pub use metadata::{MetadataObject, ObjId, Property, PropertyValue, RefSlot, Reference};
pub use partition::{Partition, PartitionKind, PartitionPack, RandomIndexPack, RipEntry};
pub use primer::Primer;
pub use registry::{
    PropertyDescriptor, PropertyKind, RegistryBuilder, ScalarKind, StaticRegistry,
    TypeDescriptor, TypeRegistry,
};
pub use resolve::{DeferredRef, Resolver};
pub use session::MxfSession;
pub use types::{EditRate, Rational, Timestamp};
pub use ul::{labels, LabelKind, Ul, UlBytes};
