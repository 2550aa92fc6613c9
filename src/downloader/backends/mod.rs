// Media tool backends

pub mod ytdlp;

pub use ytdlp::YtDlpTool;
