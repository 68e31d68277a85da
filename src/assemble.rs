//! Production image assembly
//!
//! A production stage never inherits a build environment. It starts from
//! its own minimal base and copies the ready outputs of the referenced
//! stage into a fresh rootfs, then renders a Containerfile describing the
//! runtime surface: non-privileged user, entrypoint, exposed port, and
//! health probe. Assembly is a single cached layer keyed off the source
//! stage's final key plus the image declaration.

use crate::cache::{CacheKey, LayerCache};
use crate::error::{KilnError, KilnResult};
use crate::input;
use crate::stage::builder::StageReport;
use crate::stage::graph::{ImageSpec, StageSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const STEP_NAME: &str = "assemble";

/// Result of assembling one production image
#[derive(Debug, Clone)]
pub struct AssemblyReport {
    pub stage: String,
    pub key: CacheKey,
    pub cache_hit: bool,
    pub image_dir: PathBuf,
    pub image_ref: String,
}

/// Assembles production images from ready stage outputs
pub struct ImageAssembler {
    work_dir: PathBuf,
    project_name: String,
    cache: Arc<LayerCache>,
    cache_enabled: bool,
}

impl ImageAssembler {
    pub fn new(
        work_dir: PathBuf,
        project_name: String,
        cache: Arc<LayerCache>,
        cache_enabled: bool,
    ) -> Self {
        Self {
            work_dir,
            project_name,
            cache,
            cache_enabled,
        }
    }

    /// Assemble `spec` from the ready `source` stage.
    pub async fn assemble(
        &self,
        spec: &StageSpec,
        source: &StageReport,
    ) -> KilnResult<AssemblyReport> {
        let image = spec.image.as_ref().ok_or_else(|| {
            KilnError::Assembly(format!("stage '{}' has no image declaration", spec.id))
        })?;
        self.validate_identity(spec, image)?;

        let key = CacheKey::derive(
            &spec.id,
            source.final_key.as_ref(),
            &format!("{} image={}", STEP_NAME, image.descriptor_hash()),
            &[],
        );

        let image_dir = self.work_dir.join("images").join(&spec.id);
        if image_dir.exists() {
            tokio::fs::remove_dir_all(&image_dir)
                .await
                .map_err(|e| KilnError::io("clearing image directory", e))?;
        }

        let image_ref = format!("kiln-{}-{}:{}", self.project_name, spec.id, key.short());

        if self.cache_enabled {
            if let Some(entry) = self.cache.get(&key) {
                debug!("Cache hit for {}/{} ({})", spec.id, STEP_NAME, entry.key.short());
                input::copy_tree(&self.cache.layer_dir(&key), &image_dir).await?;
                return Ok(AssemblyReport {
                    stage: spec.id.clone(),
                    key,
                    cache_hit: true,
                    image_dir,
                    image_ref,
                });
            }
        }

        self.materialize(spec, image, source, &image_dir).await?;

        if self.cache_enabled {
            let staged = self.cache.new_staging_dir().await?;
            input::copy_tree(&image_dir, &staged).await?;
            self.cache
                .put(key.clone(), &spec.id, STEP_NAME, &staged)
                .await?;
        }

        info!("Assembled image {} for stage '{}'", image_ref, spec.id);
        Ok(AssemblyReport {
            stage: spec.id.clone(),
            key,
            cache_hit: false,
            image_dir,
            image_ref,
        })
    }

    /// Non-privileged stages must run as a named, non-root identity.
    fn validate_identity(&self, spec: &StageSpec, image: &ImageSpec) -> KilnResult<()> {
        if spec.privileged {
            return Ok(());
        }
        match image.user.as_deref() {
            None => Err(KilnError::Assembly(format!(
                "stage '{}' is non-privileged but declares no user",
                spec.id
            ))),
            Some("root") => Err(KilnError::Assembly(format!(
                "stage '{}' is non-privileged but declares user 'root'",
                spec.id
            ))),
            Some(_) => Ok(()),
        }
    }

    async fn materialize(
        &self,
        spec: &StageSpec,
        image: &ImageSpec,
        source: &StageReport,
        image_dir: &Path,
    ) -> KilnResult<()> {
        let rootfs = image_dir.join("rootfs");
        input::copy_tree(&source.paths.app(), &rootfs.join("app")).await?;
        input::copy_tree(&source.paths.env(), &rootfs.join("opt/kiln")).await?;

        let containerfile = render_containerfile(spec, image)?;
        tokio::fs::write(image_dir.join("Containerfile"), containerfile)
            .await
            .map_err(|e| KilnError::io("writing Containerfile", e))?;
        Ok(())
    }
}

fn render_containerfile(spec: &StageSpec, image: &ImageSpec) -> KilnResult<String> {
    let mut file = String::new();
    file.push_str(&format!("# {} image, generated by kiln\n", spec.id));
    file.push_str(&format!("FROM {}\n\n", image.base));
    file.push_str("WORKDIR /app\n\n");
    file.push_str("COPY rootfs/opt/kiln /opt/kiln\n");
    file.push_str("COPY rootfs/app /app\n\n");

    if let Some(user) = &image.user {
        file.push_str(&format!(
            "RUN adduser -D {user} && chown -R {user}:{user} /app /opt/kiln\n",
        ));
        file.push_str(&format!("USER {}\n\n", user));
    }

    file.push_str(&format!("EXPOSE {}\n\n", image.port));
    file.push_str(&image.healthcheck.containerfile_instruction(image.port));
    file.push_str("\n\n");

    let entrypoint = serde_json::to_string(&image.entrypoint)?;
    file.push_str(&format!("ENTRYPOINT {}\n", entrypoint));
    Ok(file)
}
