//! 内嵌着色器源码
//!
//! 顶点着色器原样传递位置和纹理坐标，像素着色器对共享纹理做线性采样。

pub const QUAD_HLSL: &str = r#"
Texture2D shaderTexture;
SamplerState samplerState;

struct PS_INPUT
{
    float4 position     : SV_POSITION;
    float4 textureCoord : TEXCOORD0;
};

struct VS_INPUT
{
    float4 position     : POSITION;
    float4 textureCoord : TEXCOORD0;
};

PS_INPUT VShader(VS_INPUT In)
{
    return In;
}

float4 PShader(PS_INPUT In) : SV_TARGET
{
    return shaderTexture.Sample(samplerState, In.textureCoord);
}
"#;

/// 一对顶点/像素着色器的源码与入口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSource {
    pub source: &'static str,
    pub vertex_entry: &'static str,
    pub vertex_target: &'static str,
    pub pixel_entry: &'static str,
    pub pixel_target: &'static str,
}

impl ShaderSource {
    pub const fn quad() -> Self {
        Self {
            source: QUAD_HLSL,
            vertex_entry: "VShader",
            vertex_target: "vs_4_0",
            pixel_entry: "PShader",
            pixel_target: "ps_4_0",
        }
    }
}

impl Default for ShaderSource {
    fn default() -> Self {
        Self::quad()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_source_declares_entry_points() {
        let shader = ShaderSource::quad();
        assert!(shader.source.contains("PS_INPUT VShader("));
        assert!(shader.source.contains("float4 PShader("));
        assert!(shader.source.contains("POSITION"));
        assert!(shader.source.contains("TEXCOORD0"));
    }
}
