//! Rooms, input admission and snapshot fan-out

pub mod input_buffer;
pub mod registry;
pub mod room;
pub mod snapshot;

pub use input_buffer::{InputBuffer, InputBufferConfig, InputRejection, SharedInputBuffer};
pub use registry::{normalize_room_name, RoomRegistry};
pub use room::{Room, RoomError, RoomEvent, RoomHandle, RoomSettings};
