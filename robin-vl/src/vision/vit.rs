//! timm `VisionTransformer` forward pass on Candle.
//!
//! Weight names follow timm checkpoints (`patch_embed.proj`, `cls_token`,
//! `reg_token`, `pos_embed`, `norm_pre`, `blocks.N.{norm1,attn,ls1,norm2,mlp,ls2}`,
//! `norm`) so hub `model.safetensors` files load without remapping. Only the
//! feature extractor is built; the classifier head is never loaded.

use super::config::TimmVitConfig;
use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{
    Activation, Conv2d, Conv2dConfig, LayerNorm, Linear, VarBuilder, conv2d, conv2d_no_bias,
    layer_norm, linear_b,
};

/// Per-channel learned scale applied to a residual branch.
#[derive(Debug, Clone)]
struct LayerScale {
    gamma: Tensor,
}

impl LayerScale {
    fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gamma: vb.get(dim, "gamma")?,
        })
    }
}

impl Module for LayerScale {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.broadcast_mul(&self.gamma)
    }
}

#[derive(Debug, Clone)]
struct Attention {
    qkv: Linear,
    proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    fn new(cfg: &TimmVitConfig, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.embed_dim;
        let qkv = linear_b(dim, dim * 3, cfg.qkv_bias, vb.pp("qkv"))?;
        let proj = linear_b(dim, dim, true, vb.pp("proj"))?;
        let head_dim = cfg.head_dim();
        Ok(Self {
            qkv,
            proj,
            num_heads: cfg.num_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5),
        })
    }
}

impl Module for Attention {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, tokens, _) = xs.dims3()?;

        // (B, T, 3 * D) -> (3, B, H, T, Dh)
        let qkv = self
            .qkv
            .forward(xs)?
            .reshape((batch, tokens, 3, self.num_heads, self.head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let q = qkv.get(0)?.contiguous()?;
        let k = qkv.get(1)?.contiguous()?;
        let v = qkv.get(2)?.contiguous()?;

        let attn_weights = (q.matmul(&k.t()?)? * self.scale)?;

        // Softmax in f32, then back to the activation dtype.
        let input_dtype = attn_weights.dtype();
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights.to_dtype(DType::F32)?)?
            .to_dtype(input_dtype)?;

        let out = attn_weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, tokens, ()))?;
        self.proj.forward(&out)
    }
}

#[derive(Debug, Clone)]
struct Mlp {
    fc1: Linear,
    fc2: Linear,
    act: Activation,
}

impl Mlp {
    fn new(cfg: &TimmVitConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.mlp_hidden_dim();
        Ok(Self {
            fc1: linear_b(cfg.embed_dim, hidden, true, vb.pp("fc1"))?,
            fc2: linear_b(hidden, cfg.embed_dim, true, vb.pp("fc2"))?,
            act: cfg.act.to_candle(),
        })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&self.fc1.forward(xs)?.apply(&self.act)?)
    }
}

/// Pre-norm transformer block with optional layer scale.
#[derive(Debug, Clone)]
struct Block {
    norm1: LayerNorm,
    attn: Attention,
    ls1: Option<LayerScale>,
    norm2: LayerNorm,
    mlp: Mlp,
    ls2: Option<LayerScale>,
}

impl Block {
    fn new(cfg: &TimmVitConfig, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.embed_dim;
        let (ls1, ls2) = if cfg.init_values.is_some() {
            (
                Some(LayerScale::new(dim, vb.pp("ls1"))?),
                Some(LayerScale::new(dim, vb.pp("ls2"))?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            norm1: layer_norm(dim, cfg.layer_norm_eps, vb.pp("norm1"))?,
            attn: Attention::new(cfg, vb.pp("attn"))?,
            ls1,
            norm2: layer_norm(dim, cfg.layer_norm_eps, vb.pp("norm2"))?,
            mlp: Mlp::new(cfg, vb.pp("mlp"))?,
            ls2,
        })
    }
}

impl Module for Block {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let residual = xs;
        let h = self.attn.forward(&self.norm1.forward(xs)?)?;
        let h = match &self.ls1 {
            Some(ls) => ls.forward(&h)?,
            None => h,
        };
        let xs = (residual + h)?;

        let residual = &xs;
        let h = self.mlp.forward(&self.norm2.forward(&xs)?)?;
        let h = match &self.ls2 {
            Some(ls) => ls.forward(&h)?,
            None => h,
        };
        residual + h
    }
}

/// Feature-extractor half of a timm ViT (`num_classes=0`).
#[derive(Debug, Clone)]
pub struct VisionTransformer {
    cfg: TimmVitConfig,
    patch_embed: Conv2d,
    cls_token: Tensor,
    reg_token: Option<Tensor>,
    pos_embed: Tensor,
    norm_pre: Option<LayerNorm>,
    blocks: Vec<Block>,
    norm: LayerNorm,
}

impl VisionTransformer {
    pub fn new(cfg: &TimmVitConfig, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.embed_dim;
        let conv_cfg = Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        // Pre-norm checkpoints (CLIP) carry no patch embedding bias.
        let vb_proj = vb.pp("patch_embed").pp("proj");
        let patch_embed = if cfg.pre_norm {
            conv2d_no_bias(cfg.num_channels, dim, cfg.patch_size, conv_cfg, vb_proj)?
        } else {
            conv2d(cfg.num_channels, dim, cfg.patch_size, conv_cfg, vb_proj)?
        };

        let cls_token = vb.get((1, 1, dim), "cls_token")?;
        let reg_token = if cfg.num_reg_tokens > 0 {
            Some(vb.get((1, cfg.num_reg_tokens, dim), "reg_token")?)
        } else {
            None
        };
        let embed_len = if cfg.no_embed_class {
            cfg.num_patches()
        } else {
            cfg.num_patches() + cfg.num_prefix_tokens()
        };
        let pos_embed = vb.get((1, embed_len, dim), "pos_embed")?;

        let norm_pre = if cfg.pre_norm {
            Some(layer_norm(dim, cfg.layer_norm_eps, vb.pp("norm_pre"))?)
        } else {
            None
        };

        let vb_blocks = vb.pp("blocks");
        let blocks = (0..cfg.depth)
            .map(|i| Block::new(cfg, vb_blocks.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        let norm = layer_norm(dim, cfg.layer_norm_eps, vb.pp("norm"))?;

        Ok(Self {
            cfg: cfg.clone(),
            patch_embed,
            cls_token,
            reg_token,
            pos_embed,
            norm_pre,
            blocks,
            norm,
        })
    }

    pub fn config(&self) -> &TimmVitConfig {
        &self.cfg
    }

    /// Runs the backbone and returns every token after the final norm.
    ///
    /// `pixel_values`: `(B, C, H, W)` at the configured image size.
    /// Returns `(B, 1 + num_reg_tokens + num_patches, embed_dim)`, class token first.
    pub fn forward_features(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let (batch, _, h, w) = pixel_values.dims4()?;
        let size = self.cfg.image_size;
        if h != size || w != size {
            candle_core::bail!("expected {size}x{size} input, got {h}x{w}");
        }
        let dim = self.cfg.embed_dim;

        // (B, D, gh, gw) -> (B, N, D)
        let patches = self
            .patch_embed
            .forward(pixel_values)?
            .flatten_from(2)?
            .transpose(1, 2)?;

        let mut prefix = vec![self.cls_token.broadcast_as((batch, 1, dim))?];
        if let Some(reg) = &self.reg_token {
            prefix.push(reg.broadcast_as((batch, self.cfg.num_reg_tokens, dim))?);
        }

        let xs = if self.cfg.no_embed_class {
            let patches = patches.broadcast_add(&self.pos_embed)?;
            prefix.push(patches);
            Tensor::cat(&prefix, 1)?
        } else {
            prefix.push(patches);
            Tensor::cat(&prefix, 1)?.broadcast_add(&self.pos_embed)?
        };

        let mut xs = match &self.norm_pre {
            Some(norm) => norm.forward(&xs)?,
            None => xs,
        };
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        self.norm.forward(&xs)
    }
}
