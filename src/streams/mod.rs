mod replay;

pub use replay::{load_messages, read_csv, read_jsonl, run_replay_stream};
