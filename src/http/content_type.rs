//! Content-type resolution by file extension.

/// Resolve the MIME type of a resource location such as `/css/site.css`.
///
/// Query strings are ignored. Unknown or missing extensions resolve to `""`,
/// which the dispatcher reads as "not a static resource".
pub fn content_type(location: &str) -> &'static str {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    let file_name = path.rsplit('/').next().unwrap_or_default();
    let Some((stem, extension)) = file_name.rsplit_once('.') else {
        return "";
    };
    if stem.is_empty() && extension.is_empty() {
        return "";
    }

    match extension.to_ascii_lowercase().as_str() {
        // Web & text
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "ics" => "text/calendar",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "xhtml" => "application/xhtml+xml",

        // Fonts
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",

        // Audio
        "aac" => "audio/aac",
        "mid" | "midi" => "audio/midi",
        "oga" => "audio/ogg",
        "wav" => "audio/x-wav",
        "weba" => "audio/webm",
        "mp3" => "audio/mpeg",

        // Images
        "ico" => "image/x-icon",
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",

        // Video
        "avi" => "video/x-msvideo",
        "mp4" => "video/mp4",
        "mpeg" => "video/mpeg",
        "ogv" => "video/ogg",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        "3g2" => "video/3gpp2",

        // Archives & documents
        "bin" | "arc" => "application/octet-stream",
        "bz" => "application/x-bzip",
        "bz2" => "application/x-bzip2",
        "doc" => "application/msword",
        "epub" => "application/epub+zip",
        "jar" => "application/java-archive",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ogx" => "application/ogg",
        "pdf" => "application/pdf",
        "ppt" => "application/vnd.ms-powerpoint",
        "rar" => "application/x-rar-compressed",
        "rtf" => "application/rtf",
        "sh" => "application/x-sh",
        "tar" => "application/x-tar",
        "xls" => "application/vnd.ms-excel",
        "zip" => "application/zip",
        "7z" => "application/x-7z-compressed",
        "wasm" => "application/wasm",

        _ => "",
    }
}
