use crate::pool::Pooled;
use crate::scene::{dynamic_texture_asset, SceneHost};
use crate::types::ImageData;

/// A host-side dynamic texture owned by the texture pool.
#[derive(Debug)]
pub struct RenderTexture {
    name: String,
    asset_path: String,
    width: u32,
    height: u32,
}

impl RenderTexture {
    pub fn new(name: String, stage: &mut dyn SceneHost) -> Self {
        let asset_path = dynamic_texture_asset(&name);
        let mut texture = Self {
            name,
            asset_path,
            width: 0,
            height: 0,
        };
        texture.reset(stage);
        texture
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asset path materials reference this texture by.
    pub fn asset_path(&self) -> &str {
        &self.asset_path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_image(&mut self, stage: &mut dyn SceneHost, image: &ImageData) {
        self.width = image.width;
        self.height = image.height;
        stage.upload_texture(&self.name, image.width, image.height, &image.rgba);
    }
}

impl Pooled for RenderTexture {
    fn reset(&mut self, stage: &mut dyn SceneHost) {
        let white = ImageData::white();
        self.set_image(stage, &white);
    }

    fn destroy(&mut self, stage: &mut dyn SceneHost) {
        stage.release_texture(&self.name);
    }
}
