/// Decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ImageData {
    /// The 1×1 opaque white image textures are reset to.
    pub fn white() -> Self {
        Self {
            rgba: vec![255, 255, 255, 255],
            width: 1,
            height: 1,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.rgba.len()
    }
}

impl From<image::RgbaImage> for ImageData {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            rgba: img.into_raw(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

/// PBR metallic-roughness parameters of a glTF material.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialInfo {
    /// Base color factor [r, g, b, a].
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    /// Index into `TileModel::images`.
    pub base_color_texture: Option<usize>,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
    pub unlit: bool,
}

impl Default for MaterialInfo {
    /// The glTF default material.
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 1.0,
            roughness: 1.0,
            base_color_texture: None,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            unlit: false,
        }
    }
}
