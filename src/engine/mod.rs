//! Storage engine: codecs, value policy, the two backends and the object
//! clients the remote backend talks to.
pub mod codec;
pub mod dir_objects;
pub mod file_dir;
pub(crate) mod fsutil;
pub mod memory_objects;
pub mod object_store;
pub mod objects;
pub mod policy;

pub use codec::{check_compatible, codec_for, Codec, JsonCodec, MsgPackCodec, TextCodec};
pub use dir_objects::{DirBuckets, DirObjectClient};
pub use file_dir::LocalFileStore;
pub use memory_objects::{MemoryBuckets, MemoryObjectClient};
pub use object_store::RemoteObjectStore;
pub use objects::{list_all, validate_object_name, ObjectBuckets, ObjectClient, ObjectMeta, ObjectPage};
pub use policy::{StorePolicy, ValueKind};
