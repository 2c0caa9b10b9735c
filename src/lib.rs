//! Detection, creation and edition of DOS (MBR) and GPT disk labels.
//!
//! ```no_run
//! use fzdisk::{Context, Partition};
//!
//! let mut context = Context::open(Some("disk.img".as_ref()), true, false)?;
//! context.create_disklabel(Some("gpt"))?;
//!
//! let mut partition = Partition::with_follow_defaults(true, true, true);
//! partition.set_name("root");
//! let partno = context.add_partition(&partition)?;
//!
//! context.write_disklabel()?;
//! println!("created partition {partno} on a {} label", context.label_name());
//! # Ok::<(), fzdisk::Error>(())
//! ```

#[macro_use]
extern crate static_assertions;

pub mod context;
pub mod device;
pub mod error;
pub mod field;
pub mod fstype;
pub mod gpt;
pub mod label;
pub mod mbr;
pub mod partition;
pub mod parttype;
pub mod topology;

pub use context::{Context, ContextOptions, WipeMode};
pub use error::{Error, ErrorKind, PartitionError, Result};
pub use field::{FieldTag, SizeUnit};
pub use gpt::{GptAttributes, GptEntry, GptHeader, Guid};
pub use label::{FreeSpace, Label, LabelDriver, LabelKind};
pub use mbr::{Mbr, MbrPartition};
pub use partition::{Direction, Partition, PartitionTable, Setting};
pub use parttype::{PartType, PartTypeRegistry};
pub use topology::Topology;
