use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::*;

/// A [Loader] which reads files under a given root directory and hands the bytes to a [Decoder].
///
/// Asset keys are forward-slash paths relative to the root; a leading `/` is ignored, so `/models/ship.glb` and
/// `models/ship.glb` name the same file.  Keys using `\` as a separator aren't supported.  A key whose `..` segments
/// climb out of the root resolves to an error instead of a file, which usually points at a bad asset reference.
#[derive(Debug)]
pub struct FileLoader<T, D> {
    root_path: PathBuf,
    decoder: D,
    _output: PhantomData<fn() -> T>,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf, LoadError> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|e| LoadError::Io(format!("invalid path: {}", e)))
}

impl<T, D: Decoder<T>> FileLoader<T, D> {
    pub fn new(root_path: &Path, decoder: D) -> FileLoader<T, D> {
        FileLoader {
            root_path: root_path.to_path_buf(),
            decoder,
            _output: PhantomData,
        }
    }

    /// Where a key lives on disk, refusing anything outside the root.
    pub fn resolve(&self, key: &CacheKey) -> Result<PathBuf, LoadError> {
        // Resolve `.` and `..` lexically; the file may not exist yet, so the filesystem can't be asked.
        let trimmed = key.as_str().trim_start_matches('/');
        let absolute = conv_path(trimmed)?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            return Err(LoadError::Io(format!(
                "{} is outside the loader's root directory",
                key
            )));
        }
        Ok(absolute)
    }
}

#[async_trait::async_trait]
impl<T, D> Loader<T> for FileLoader<T, D>
where
    T: Send + 'static,
    D: Decoder<T>,
{
    async fn load(&self, key: &CacheKey) -> Result<T, LoadError> {
        let path = self.resolve(key)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(key.clone()),
            _ => LoadError::Io(e.to_string()),
        })?;
        self.decoder
            .decode(key, bytes)
            .map_err(|e| LoadError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Treats each line of a file as a mesh with that many vertices.
    struct LineDecoder;

    #[derive(Debug, thiserror::Error)]
    #[error("bad vertex count: {0}")]
    struct BadCount(String);

    impl Decoder<Asset> for LineDecoder {
        type Error = BadCount;

        fn decode(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<Asset, BadCount> {
            let text = String::from_utf8_lossy(&bytes);
            let meshes = text
                .lines()
                .map(|l| -> Result<Mesh, BadCount> {
                    let count: usize = l.trim().parse().map_err(|_| BadCount(l.to_string()))?;
                    Ok(Mesh::new(key.as_str(), Geometry::new(count, count), Material::default()))
                })
                .collect::<Result<Vec<_>, BadCount>>()?;
            Ok(Asset::new(meshes))
        }
    }

    #[tokio::test]
    async fn test_file_loader() {
        let tmp_dir = tempfile::tempdir().unwrap();

        // The root sits one level down so there is somewhere to escape to.
        let root = tmp_dir.path().join("assets");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a"), "3\n4").unwrap();
        std::fs::write(root.join("bad"), "three").unwrap();
        // A real file just outside the root.
        std::fs::write(root.parent().unwrap().join("d"), "5").unwrap();

        let loader: FileLoader<Asset, _> = FileLoader::new(&root, LineDecoder);

        let asset = loader.load(&"a".into()).await.unwrap();
        assert_eq!(asset.vertex_count(), 7);
        assert_eq!(loader.load(&"/a".into()).await.unwrap().meshes.len(), 2);
        assert_eq!(loader.resolve(&"models/../a".into()).unwrap(), root.join("a"));

        assert_eq!(
            loader.load(&"nope".into()).await.unwrap_err(),
            LoadError::NotFound("nope".into())
        );
        assert!(matches!(
            loader.load(&"bad".into()).await.unwrap_err(),
            LoadError::Decode(_)
        ));
        // Climbing out of the root is refused even though the file exists.
        assert!(matches!(
            loader.load(&"../d".into()).await.unwrap_err(),
            LoadError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_file_loader_behind_the_cache() {
        let tmp_dir = tempfile::tempdir().unwrap();
        std::fs::write(tmp_dir.path().join("ship"), "12000").unwrap();

        let (_, disposal) = crate::disposal::tests::recording();
        let quality = Arc::new(QualityController::new(QualityTier::Low, 20, None));
        let optimizer = AssetOptimizer::new(None, disposal.clone(), 10_000);
        let cache = AssetCache::new(
            "asset",
            disposal,
            quality,
            Arc::new(move |a: &mut Asset, tier| optimizer.optimize(a, tier)),
            None,
        );

        let loader: Arc<dyn Loader<Asset>> = Arc::new(FileLoader::<Asset, _>::new(tmp_dir.path(), LineDecoder));
        let handle = cache.request("ship", loader).await.unwrap();
        assert_eq!(handle.read().meshes[0].material.roughness, LOW_ROUGHNESS);
    }
}
