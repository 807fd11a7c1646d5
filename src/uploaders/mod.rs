mod media;

pub use media::MediaUploadHandler;
