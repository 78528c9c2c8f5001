pub mod input;
pub mod publisher;
pub mod server;
pub mod types;
pub mod wav;

pub use input::{InputPump, PcmSource};
pub use publisher::{AudioHub, AudioPublisher, Listener, StreamStats};
pub use server::{local_ip_for, stream_url, StreamServer, STREAM_PATH};
pub use types::{SampleFormat, StreamConfig, CHUNK_MS};
pub use wav::{wav_header, WAV_HEADER_LEN};
