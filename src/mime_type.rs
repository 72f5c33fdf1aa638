use lazy_static::lazy_static;
use mime::Mime;

lazy_static! {
    /// The content type of recorded audio.
    pub static ref AUDIO_M4A: Mime = "audio/m4a".parse().expect("parse audio/m4a");

    /// The content type of backup archives, for both sharing and picking.
    pub static ref APPLICATION_ZIP: Mime = "application/zip".parse().expect("parse application/zip");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn essences() {
        assert_eq!(AUDIO_M4A.essence_str(), "audio/m4a");
        assert_eq!(APPLICATION_ZIP.type_(), mime::APPLICATION);
        assert_eq!(APPLICATION_ZIP.subtype().as_str(), "zip");
    }
}
