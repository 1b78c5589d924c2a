//! File categories and the per-directory content type mask.

use bitflags::bitflags;

bitflags! {
    /// Categories present somewhere below a directory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContentTypes: u8 {
        const AUDIO      = 0b0000_0001;
        const COMPRESSED = 0b0000_0010;
        const DOCUMENT   = 0b0000_0100;
        const EXECUTABLE = 0b0000_1000;
        const PICTURE    = 0b0001_0000;
        const VIDEO      = 0b0010_0000;
        const DIRECTORY  = 0b0100_0000;
    }
}

/// Category of a single file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Audio,
    Compressed,
    Document,
    Executable,
    Picture,
    Video,
}

impl FileCategory {
    pub fn flag(self) -> ContentTypes {
        match self {
            Self::Audio => ContentTypes::AUDIO,
            Self::Compressed => ContentTypes::COMPRESSED,
            Self::Document => ContentTypes::DOCUMENT,
            Self::Executable => ContentTypes::EXECUTABLE,
            Self::Picture => ContentTypes::PICTURE,
            Self::Video => ContentTypes::VIDEO,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Compressed => "compressed",
            Self::Document => "document",
            Self::Executable => "executable",
            Self::Picture => "picture",
            Self::Video => "video",
        }
    }

    /// Looks up a category by name.
    pub fn lookup(value: &str) -> Option<Self> {
        match value {
            "audio" | "music" => Some(Self::Audio),
            "compressed" | "archive" | "archives" => Some(Self::Compressed),
            "document" | "documents" | "doc" | "docs" => Some(Self::Document),
            "executable" | "executables" | "exe" => Some(Self::Executable),
            "picture" | "pictures" | "image" | "images" => Some(Self::Picture),
            "video" | "videos" => Some(Self::Video),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Extension category constants
// ---------------------------------------------------------------------------

pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "mp2", "mid", "midi", "wav", "au", "aiff", "flac", "ogg", "oga", "opus", "wma", "m4a",
    "aac", "ape", "wv", "alac", "sm",
];

pub const COMPRESSED_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "ace", "arj", "hqx", "lha", "sea", "tar", "tgz", "gz", "bz2", "xz", "zst",
    "cab", "z",
];

pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "txt", "nfo", "doc", "docx", "rtf", "odt", "pdf", "epub", "mobi", "htm", "html", "xls",
    "xlsx", "ppt", "pptx", "wri", "md",
];

pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "com", "msi", "bat", "cmd", "app", "apk", "jar", "pif", "run", "dmg",
];

pub const PICTURE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "ico", "pcx", "psd", "heic",
    "raw", "svg",
];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mpg", "mpeg", "mkv", "mp4", "m4v", "avi", "mov", "wmv", "webm", "flv", "asf", "ogm", "vob",
    "divx", "3gp", "ts", "m2ts", "rm", "rmvb",
];

/// Returns the lowercase extension of a lowercase file name.
pub fn extension_of(lower_name: &str) -> Option<&str> {
    match lower_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() && !extension.is_empty() => Some(extension),
        _ => None,
    }
}

/// Categorizes a lowercase file name by its extension.
pub fn categorize(lower_name: &str) -> Option<FileCategory> {
    let extension = extension_of(lower_name)?;
    let category = if AUDIO_EXTENSIONS.contains(&extension) {
        FileCategory::Audio
    } else if COMPRESSED_EXTENSIONS.contains(&extension) || is_rar_volume(extension) {
        FileCategory::Compressed
    } else if DOCUMENT_EXTENSIONS.contains(&extension) {
        FileCategory::Document
    } else if EXECUTABLE_EXTENSIONS.contains(&extension) {
        FileCategory::Executable
    } else if PICTURE_EXTENSIONS.contains(&extension) {
        FileCategory::Picture
    } else if VIDEO_EXTENSIONS.contains(&extension) {
        FileCategory::Video
    } else {
        return None;
    };
    Some(category)
}

/// Multi-volume archive parts: `r00`..`r99` and `s00`..`s99`.
fn is_rar_volume(extension: &str) -> bool {
    let bytes = extension.as_bytes();
    bytes.len() == 3
        && (bytes[0] == b'r' || bytes[0] == b's')
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
}
