use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage, Rgba};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Edge lengths produced for every photo, smallest first.
pub const VARIANT_SIZES: [u32; 4] = [128, 256, 512, 1024];
pub const PRIMARY_SIZE: u32 = 1024;
pub const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("photo url has no usable file name: {0}")]
    InvalidUrl(String),
    #[error("photo download failed for {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("HTTP error {status} for URL {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("image cache io failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("image codec failed: {0}")]
    Codec(#[from] image::ImageError),
}

/// Source of original photo bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError>;
}

#[async_trait]
impl<T: ImageFetcher + ?Sized> ImageFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        (**self).fetch(url).await
    }
}

pub struct HttpImageFetcher {
    http: Client,
}

impl HttpImageFetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let fetch_err = |message: String| ImageError::Fetch {
            url: url.to_string(),
            message,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| fetch_err(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let final_url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(ImageError::Status {
                status: status.as_u16(),
                url: final_url,
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| fetch_err(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Flat, append-only directory holding original downloads and resized variants.
#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ImageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| io_error(&dir, source))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Originals are stored under the last path segment of their URL.
    pub fn origin_path(&self, url: &str) -> Result<PathBuf, ImageError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| ImageError::InvalidUrl(url.to_string()))?;
        let file_name = parsed
            .path()
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .filter(|segment| *segment != "." && *segment != "..")
            .ok_or_else(|| ImageError::InvalidUrl(url.to_string()))?;
        Ok(self.dir.join(file_name))
    }

    pub fn variant_path(&self, base_name: &str, index: usize, size: u32) -> PathBuf {
        self.dir.join(format!("{base_name}_{index}_{size}.jpg"))
    }

    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, ImageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(path, source)),
        }
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|source| io_error(path, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ImageError {
    ImageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Base64 JPEG payloads for one photo, keyed by edge length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSet {
    encoded: BTreeMap<u32, String>,
}

impl VariantSet {
    pub fn get(&self, size: u32) -> Option<&str> {
        self.encoded.get(&size).map(String::as_str)
    }

    pub fn largest(&self) -> Option<&str> {
        self.encoded.values().next_back().map(String::as_str)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.encoded.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryImage {
    pub name: String,
    pub variants: VariantSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedImages {
    /// Largest variant of the first photo.
    pub primary: Option<String>,
    /// Every following photo, in listing order.
    pub gallery: Vec<GalleryImage>,
}

pub struct ImagePipeline<F> {
    cache: ImageCache,
    fetcher: F,
}

impl<F: ImageFetcher> ImagePipeline<F> {
    pub fn new(cache: ImageCache, fetcher: F) -> Self {
        Self { cache, fetcher }
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub async fn derive(
        &self,
        base_name: &str,
        photos: &[String],
    ) -> Result<DerivedImages, ImageError> {
        let mut derived = DerivedImages::default();
        for (position, url) in photos.iter().enumerate() {
            let index = position + 1;
            let variants = self.variants(url, base_name, index).await?;
            if derived.primary.is_none() {
                derived.primary = variants
                    .get(PRIMARY_SIZE)
                    .or_else(|| variants.largest())
                    .map(str::to_string);
            } else {
                derived.gallery.push(GalleryImage {
                    name: gallery_name(base_name, index),
                    variants,
                });
            }
        }
        Ok(derived)
    }

    /// Produces all sizes for one photo. A variant file already on disk is
    /// returned as-is and never recomputed.
    pub async fn variants(
        &self,
        url: &str,
        base_name: &str,
        index: usize,
    ) -> Result<VariantSet, ImageError> {
        let origin = self.origin(url).await?;
        let mut decoded: Option<RgbImage> = None;
        let mut set = VariantSet::default();

        for size in VARIANT_SIZES {
            let path = self.cache.variant_path(base_name, index, size);
            let bytes = match self.cache.read(&path).await? {
                Some(bytes) => bytes,
                None => {
                    let source = match decoded.take() {
                        Some(image) => image,
                        None => decode_opaque(&origin)?,
                    };
                    let bytes = encode_variant(&source, size)?;
                    decoded = Some(source);
                    self.cache.write(&path, &bytes).await?;
                    info!(target = "lbc.images", file = %path.display(), "resized_image_cached");
                    bytes
                }
            };
            set.encoded.insert(size, BASE64.encode(&bytes));
        }
        Ok(set)
    }

    async fn origin(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let path = self.cache.origin_path(url)?;
        if let Some(bytes) = self.cache.read(&path).await? {
            debug!(target = "lbc.images", url, "origin_cache_hit");
            return Ok(bytes);
        }
        let bytes = self.fetcher.fetch(url).await?;
        self.cache.write(&path, &bytes).await?;
        debug!(target = "lbc.images", url, bytes = bytes.len(), "origin_downloaded");
        Ok(bytes)
    }
}

pub fn gallery_name(base_name: &str, index: usize) -> String {
    format!("{base_name}_{index}.jpg")
}

/// Lower-cases the title, turns whitespace into underscores and keeps only
/// `[a-z0-9_]`.
pub fn base_name(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Decodes `source`, flattens it onto white and re-encodes it so that its
/// longer edge is at most `edge`.
#[cfg(test)]
pub fn resize_to_jpeg(source: &[u8], edge: u32) -> Result<Vec<u8>, ImageError> {
    let image = decode_opaque(source)?;
    encode_variant(&image, edge)
}

fn decode_opaque(source: &[u8]) -> Result<RgbImage, ImageError> {
    let image = image::load_from_memory(source)?;
    Ok(flatten_onto_white(image))
}

fn flatten_onto_white(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }
    let rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn encode_variant(image: &RgbImage, edge: u32) -> Result<Vec<u8>, ImageError> {
    let (width, height) = image.dimensions();
    let (target_w, target_h) = fit_within(width, height, edge);
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        if (target_w, target_h) == (width, height) {
            encoder.encode_image(image)?;
        } else {
            let resized =
                image::imageops::resize(image, target_w, target_h, FilterType::Lanczos3);
            encoder.encode_image(&resized)?;
        }
    }
    Ok(out)
}

/// Never upscales.
fn fit_within(width: u32, height: u32, edge: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= edge || longer == 0 {
        return (width, height);
    }
    let scale = |side: u32| {
        let scaled = (side as u64 * edge as u64 + longer as u64 / 2) / longer as u64;
        (scaled as u32).max(1)
    };
    (scale(width), scale(height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat, RgbaImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        png(DynamicImage::ImageRgb8(RgbImage::from_fn(
            width,
            height,
            |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]),
        )))
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        bodies: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn with(photos: &[(&str, Vec<u8>)]) -> Arc<Self> {
            Arc::new(Self {
                bodies: photos
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.get(url).cloned().ok_or_else(|| ImageError::Status {
                status: 404,
                url: url.to_string(),
                body: "not found".into(),
            })
        }
    }

    const FIRST: &str = "https://img.example.com/ad-large/first.jpg";
    const SECOND: &str = "https://img.example.com/ad-large/second.jpg";

    #[test]
    fn base_name_keeps_ascii_word_characters() {
        assert_eq!(
            base_name("Locomotive BB 9200 Märklin (HO)"),
            "locomotive_bb_9200_mrklin_ho"
        );
        assert_eq!(base_name("Wagon\tSNCF"), "wagon_sncf");
    }

    #[test]
    fn resize_is_deterministic() {
        let source = gradient(300, 200);
        let first = resize_to_jpeg(&source, 128).expect("resize");
        let second = resize_to_jpeg(&source, 128).expect("resize");
        assert_eq!(first, second);

        let decoded = image::load_from_memory(&first).expect("decode");
        assert_eq!(decoded.dimensions(), (128, 85));
    }

    #[test]
    fn resize_never_upscales() {
        let source = gradient(100, 60);
        let out = resize_to_jpeg(&source, 512).expect("resize");
        let decoded = image::load_from_memory(&out).expect("decode");
        assert_eq!(decoded.dimensions(), (100, 60));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let source = png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            16,
            16,
            Rgba([0, 0, 0, 0]),
        )));
        let out = resize_to_jpeg(&source, 128).expect("resize");
        let decoded = image::load_from_memory(&out).expect("decode").into_rgb8();
        let Rgb([r, g, b]) = *decoded.get_pixel(8, 8);
        assert!(r > 245 && g > 245 && b > 245, "got {r},{g},{b}");
    }

    #[test]
    fn origin_path_uses_last_url_segment() {
        let cache = ImageCache {
            dir: PathBuf::from("images"),
        };
        let path = cache
            .origin_path("https://img.example.com/ad-large/abc.jpg?rule=ad-large")
            .expect("path");
        assert_eq!(path, PathBuf::from("images/abc.jpg"));
        assert!(cache.origin_path("https://img.example.com/").is_err());
    }

    #[tokio::test]
    async fn derive_builds_primary_and_gallery_variants() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ImageCache::open(dir.path().join("images")).await.expect("cache");
        let fetcher = ScriptedFetcher::with(&[
            (FIRST, gradient(1600, 1200)),
            (SECOND, gradient(400, 300)),
        ]);
        let pipeline = ImagePipeline::new(cache, fetcher.clone());
        let photos = vec![FIRST.to_string(), SECOND.to_string()];

        let derived = pipeline.derive("wagon_sncf", &photos).await.expect("derive");

        assert!(derived.primary.is_some());
        assert_eq!(derived.gallery.len(), 1);
        assert_eq!(derived.gallery[0].name, "wagon_sncf_2.jpg");
        assert_eq!(derived.gallery[0].variants.len(), VARIANT_SIZES.len());
        assert_eq!(fetcher.calls(), 2);

        let root = pipeline.cache().dir();
        assert!(root.join("first.jpg").exists());
        for size in VARIANT_SIZES {
            assert!(root.join(format!("wagon_sncf_1_{size}.jpg")).exists());
            assert!(root.join(format!("wagon_sncf_2_{size}.jpg")).exists());
        }

        let primary = BASE64
            .decode(derived.primary.expect("primary"))
            .expect("base64");
        let decoded = image::load_from_memory(&primary).expect("decode");
        assert_eq!(decoded.dimensions(), (1024, 768));
    }

    #[tokio::test]
    async fn warm_cache_performs_no_fetches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let photos = vec![FIRST.to_string(), SECOND.to_string()];
        let seed = ScriptedFetcher::with(&[(FIRST, gradient(64, 64)), (SECOND, gradient(32, 48))]);
        let first_run = ImagePipeline::new(ImageCache::open(dir.path()).await.expect("cache"), seed)
            .derive("coffret", &photos)
            .await
            .expect("first run");

        let empty = ScriptedFetcher::with(&[]);
        let second_run =
            ImagePipeline::new(ImageCache::open(dir.path()).await.expect("cache"), empty.clone())
                .derive("coffret", &photos)
                .await
                .expect("second run");

        assert_eq!(empty.calls(), 0);
        assert_eq!(first_run, second_run);
    }

    #[tokio::test]
    async fn cached_variants_are_not_recomputed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ImageCache::open(dir.path()).await.expect("cache");
        std::fs::write(dir.path().join("first.jpg"), b"not an image").expect("origin");
        for size in VARIANT_SIZES {
            std::fs::write(cache.variant_path("rail", 1, size), format!("cached-{size}"))
                .expect("variant");
        }
        let pipeline = ImagePipeline::new(cache, ScriptedFetcher::with(&[]));

        let set = pipeline.variants(FIRST, "rail", 1).await.expect("variants");

        assert_eq!(set.get(256), Some(BASE64.encode("cached-256").as_str()));
        assert_eq!(set.largest(), Some(BASE64.encode("cached-1024").as_str()));
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = ImagePipeline::new(
            ImageCache::open(dir.path()).await.expect("cache"),
            ScriptedFetcher::with(&[]),
        );
        let err = pipeline
            .derive("x", &[FIRST.to_string()])
            .await
            .expect_err("missing photo");
        assert!(matches!(err, ImageError::Status { status: 404, .. }));
        assert!(!dir.path().join("first.jpg").exists());
    }

    #[tokio::test]
    async fn http_fetcher_reports_status_and_body() {
        let server = httpmock::MockServer::start();
        let ok = server.mock(|when, then| {
            when.method("GET").path("/photos/ok.jpg");
            then.status(200).body("jpeg-bytes");
        });
        let missing = server.mock(|when, then| {
            when.method("GET").path("/photos/gone.jpg");
            then.status(410).body("gone");
        });
        let fetcher = HttpImageFetcher::new(Client::new());

        let bytes = fetcher
            .fetch(&server.url("/photos/ok.jpg"))
            .await
            .expect("fetch");
        assert_eq!(bytes, b"jpeg-bytes");

        let err = fetcher
            .fetch(&server.url("/photos/gone.jpg"))
            .await
            .expect_err("410");
        match err {
            ImageError::Status { status, body, url } => {
                assert_eq!(status, 410);
                assert_eq!(body, "gone");
                assert!(url.ends_with("/photos/gone.jpg"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        ok.assert();
        missing.assert();
    }
}
