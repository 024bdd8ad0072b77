use std::collections::BTreeMap;
use std::rc::Rc;

use prism_assets::MeshData;
use prism_renderer::device::{Attachment, ShaderStage, StageSource};
use prism_renderer::{
    Capability, ClearFlags, FramePipeline, GraphicsDevice, HeadlessDevice, Mesh, Quad, RenderError, RenderPass,
    RenderTarget, Renderable, ShaderProgram, TextureFormat, UniformBlockBuffer, Viewport, shared,
};

const VERT: &str = "layout(location = 0) in vec3 pos; void main() { gl_Position = vec4(pos, 1.0); }";

fn stages(fragment_label: &str, fragment: &str) -> Vec<StageSource> {
    vec![
        StageSource {
            stage: ShaderStage::Vertex,
            label: "screen.vert".into(),
            source: VERT.into(),
        },
        StageSource {
            stage: ShaderStage::Fragment,
            label: fragment_label.into(),
            source: fragment.into(),
        },
    ]
}

fn program(device: &mut HeadlessDevice, label: &str, fragment: &str) -> ShaderProgram {
    ShaderProgram::new(device, &stages(label, fragment)).unwrap()
}

fn quad(device: &mut HeadlessDevice) -> Rc<dyn Renderable> {
    Rc::new(Quad::new(device).unwrap())
}

#[test]
fn target_exposes_every_declared_output() {
    let mut device = HeadlessDevice::new(8, 8);
    let gbuffer = program(
        &mut device,
        "gbuffer.frag",
        "layout(location = 0) out vec4 fragColor;
         layout(location = 1) out vec4 fragNormal;
         layout(location = 2) out vec4 fragPosition;
         void main() {}",
    );
    let target = RenderTarget::for_program(&mut device, "gbuffer", &gbuffer, 8, 8, TextureFormat::Rgba32F, true).unwrap();

    let mut names: Vec<&str> = target.outputs().collect();
    names.sort_unstable();
    assert_eq!(names, ["fragColor", "fragNormal", "fragPosition"]);
    assert_eq!(target.slot("fragNormal"), Some(1));
    assert!(target.require(&["fragColor", "fragPosition"]).is_ok());
    assert!(target.depth_texture().is_some());
    assert_eq!(target.textures().len(), 4);
    match target.buffer("fragTangent") {
        Err(RenderError::MissingAttachment(name)) => assert_eq!(name, "fragTangent"),
        other => panic!("expected a missing attachment, got {other:?}"),
    }
}

#[test]
fn outputs_map_keeps_explicit_slots() {
    let mut device = HeadlessDevice::new(2, 2);
    let outputs: BTreeMap<String, u32> = [("albedo".to_string(), 2), ("normal".to_string(), 0)].into();
    let target = RenderTarget::from_outputs(&mut device, "sparse", &outputs, 2, 2, TextureFormat::Rgba8, false).unwrap();
    assert_eq!(target.color_attachment(2), target.buffer("albedo").ok());
    assert_eq!(target.color_attachment(1), None);
    assert_eq!(target.viewport(), Viewport::full(2, 2));
}

#[test]
fn clear_only_pass_clears_without_drawing() {
    let mut device = HeadlessDevice::new(2, 2);
    let clear = program(&mut device, "clear.frag", "out float value; void main() {}");
    let value = Rc::new(
        RenderTarget::for_program(&mut device, "value", &clear, 2, 2, TextureFormat::Rgba32F, false).unwrap(),
    );
    assert_eq!(value.outputs().collect::<Vec<_>>(), vec!["value"]);

    let mut pass = RenderPass::new("clear", shared(clear), Some(value.clone()));
    pass.set_clear_color([0.5, 0.5, 0.5, 0.5]).add_clear_bits(ClearFlags::COLOR);

    let stats = pass.render(&mut device).unwrap();
    assert_eq!(stats.draws, 0);
    assert!(stats.cleared);
    assert!(device.draw_log().is_empty());

    let texels = value.read_color(&mut device, "value", Viewport::full(2, 2)).unwrap();
    assert_eq!(texels.len(), 16);
    assert!(texels.chunks_exact(4).all(|texel| texel[0] == 0.5));
}

#[test]
fn instanced_pass_issues_one_submission_per_renderable() {
    let mut device = HeadlessDevice::new(4, 4);
    let cube: Rc<dyn Renderable> = Rc::new(
        Mesh::upload(&mut device, &MeshData::cube(1.0))
            .unwrap()
            .instanced_by_id(),
    );
    let instanced = shared(program(&mut device, "instanced.frag", "out vec4 color; void main() {}"));
    let mut pass = RenderPass::new("instanced", instanced, None);
    pass.add_renderable(cube).set_instances(3000);

    let stats = pass.render(&mut device).unwrap();
    assert_eq!(stats.draws, 1);
    assert_eq!(device.draw_log().len(), 1);
    assert_eq!(device.draw_log()[0].instances, Some(3000));
}

#[test]
fn quads_cannot_be_drawn_instanced() {
    let mut device = HeadlessDevice::new(4, 4);
    let screen = shared(program(&mut device, "screen.frag", "out vec4 color; void main() {}"));
    let mut pass = RenderPass::new("screen", screen, None);
    pass.add_renderable(quad(&mut device));
    assert!(matches!(
        pass.render_instanced(&mut device, 4),
        Err(RenderError::NotInstanceable(_))
    ));
    assert!(device.draw_log().is_empty());
}

#[test]
fn block_members_land_at_their_offsets() {
    let mut device = HeadlessDevice::new(1, 1);
    let shader = program(
        &mut device,
        "block.frag",
        "layout(std140) uniform Params { float a; float b; };
         out vec4 color;
         void main() {}",
    );
    let mut block = UniformBlockBuffer::from_program(&shader, "Params").unwrap();
    assert!(block.update_value("a", &[1.0]));
    assert!(block.update_value("b", &[2.0]));
    assert!(!block.update_value("c", &[3.0]));

    let buffer = block.upload(&mut device).unwrap();
    let bytes = device.buffer_data(buffer).unwrap();
    let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[..8]);
    assert_eq!(floats, [1.0, 2.0]);
    assert_eq!(block.read("a", 2), Some(&[1.0, 2.0][..]));
}

#[test]
fn repeated_block_values_leave_the_buffer_unchanged() {
    let mut device = HeadlessDevice::new(1, 1);
    let shader = program(
        &mut device,
        "block.frag",
        "layout(std140) uniform Params { mat4 model; vec3 tint; float strength; };
         out vec4 color;
         void main() {}",
    );
    let mut block = UniformBlockBuffer::from_program(&shader, "Params").unwrap();
    let model: Vec<f32> = (0..16).map(|i| i as f32 * 0.5).collect();

    let mut uploads = Vec::new();
    for _ in 0..2 {
        assert!(block.update_value("model", &model));
        assert!(block.update_value("tint", &[0.2, 0.4, 0.6]));
        assert!(block.update_value("strength", &[0.75]));
        let buffer = block.upload(&mut device).unwrap();
        uploads.push(device.buffer_data(buffer).unwrap().to_vec());
    }
    assert_eq!(uploads[0], uploads[1]);
    assert_eq!(block.read("strength", 1), Some(&[0.75][..]));
}

#[test]
fn unknown_uniform_update_is_a_noop() {
    let mut device = HeadlessDevice::new(1, 1);
    let mut shader = program(&mut device, "u.frag", "uniform float strength; out vec4 color; void main() {}");

    assert!(!shader.update("missing", 1.0f32));
    assert!(!shader.update("missing", 2.0f32));
    assert_eq!(shader.pending_value("missing"), None);

    assert!(shader.update("strength", 0.25f32));
    shader.use_program(&mut device);
    assert_eq!(
        device.uniform_value(shader.handle(), "strength"),
        Some(&prism_renderer::UniformValue::Float(0.25))
    );
}

#[test]
fn second_pass_reads_what_the_first_wrote() {
    let mut device = HeadlessDevice::new(2, 2);
    let quad = quad(&mut device);
    let first = Rc::new(
        RenderTarget::with_color_attachments(&mut device, "T", 2, 2, 1, TextureFormat::Rgba32F, false).unwrap(),
    );
    let second = Rc::new(
        RenderTarget::with_color_attachments(&mut device, "U", 2, 2, 1, TextureFormat::Rgba32F, false).unwrap(),
    );
    device.register_kernel("write.frag", |input| vec![[input.float("level"), 0.0, 0.0, 1.0]]);
    device.register_kernel("copy.frag", |input| {
        let texel = input.sample("tex", input.uv);
        vec![[texel[0] * 2.0, texel[1], texel[2], texel[3]]]
    });

    let writer = shared(program(&mut device, "write.frag", "uniform float level; out vec4 c; void main() {}"));
    writer.borrow_mut().update("level", 0.25f32);
    let reader = shared(program(&mut device, "copy.frag", "uniform sampler2D tex; out vec4 c; void main() {}"));

    let mut write = RenderPass::new("write", writer, Some(first.clone()));
    write.add_disable(Capability::DepthTest).add_renderable(quad.clone());
    let mut read = RenderPass::new("read", reader, Some(second.clone()));
    read.add_disable(Capability::DepthTest)
        .add_renderable(quad)
        .read_texture("tex", first.buffer("color0").unwrap());

    let mut pipeline = FramePipeline::new();
    pipeline.name_target(&first).name_target(&second);
    pipeline.add_pass(write).add_pass(read);
    pipeline.validate().unwrap();
    let stats = pipeline.execute(&mut device).unwrap();

    assert_eq!(stats.steps, 2);
    assert_eq!(stats.draws, 2);
    let writes_to_t = device
        .draw_log()
        .iter()
        .filter(|d| d.framebuffer == Some(first.framebuffer()))
        .count();
    assert_eq!(writes_to_t, 1);
    let result = second.read_color(&mut device, "color0", Viewport::new(1, 1, 1, 1)).unwrap();
    assert_eq!(result, vec![0.5, 0.0, 0.0, 1.0]);
}

#[test]
fn disabled_steps_are_skipped() {
    let mut device = HeadlessDevice::new(2, 2);
    let screen = shared(program(&mut device, "screen.frag", "out vec4 color; void main() {}"));
    let mut pass = RenderPass::new("screen", screen, None);
    pass.add_renderable(quad(&mut device));

    let mut pipeline = FramePipeline::new();
    pipeline.add_pass(pass).add_custom("count", Vec::new(), Vec::new(), |_: &mut dyn GraphicsDevice| Ok(7));
    assert!(pipeline.set_enabled("screen", false));
    assert!(!pipeline.set_enabled("nope", false));

    let stats = pipeline.execute(&mut device).unwrap();
    assert_eq!(stats.steps, 1);
    assert_eq!(stats.draws, 7);
    assert!(device.draw_log().is_empty());
}

#[test]
fn compile_failure_names_the_stage_and_file() {
    let mut device = HeadlessDevice::new(1, 1);
    let broken = stages("broken.frag", "out vec4 color;");
    match ShaderProgram::new(&mut device, &broken) {
        Err(RenderError::Compile { stage, label, log }) => {
            assert_eq!(stage, ShaderStage::Fragment);
            assert_eq!(label, "broken.frag");
            assert!(log.contains("main"));
        }
        Err(other) => panic!("expected a compile error, got {other}"),
        Ok(_) => panic!("a stage without main must not compile"),
    }

    let mut vertex_only = stages("x.frag", "void main() {}");
    vertex_only.truncate(1);
    assert!(matches!(
        ShaderProgram::new(&mut device, &vertex_only),
        Err(RenderError::Link { .. })
    ));
}

#[test]
fn missing_shader_file_reports_the_path() {
    let mut device = HeadlessDevice::new(1, 1);
    let root = std::path::Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../resources/shaders"));
    match ShaderProgram::from_files(&mut device, root, &["screen_space/fullscreen.vert", "screen_space/nope.frag"]) {
        Err(RenderError::ShaderSource { path, .. }) => assert!(path.ends_with("screen_space/nope.frag")),
        Err(other) => panic!("expected a source error, got {other}"),
        Ok(_) => panic!("missing file must fail"),
    }
}

#[test]
fn depth_readback_after_clear() {
    let mut device = HeadlessDevice::new(4, 4);
    let shadow = Rc::new(RenderTarget::depth_only(&mut device, "shadow", 4, 4).unwrap());
    let depth_program = shared(program(&mut device, "depth.frag", "void main() {}"));
    let mut pass = RenderPass::new("shadow", depth_program, Some(shadow.clone()));
    pass.set_clear_depth(0.75).add_clear_bits(ClearFlags::DEPTH);
    pass.render(&mut device).unwrap();

    assert_eq!(shadow.read_center_depth(&mut device).unwrap(), 0.75);
    let raw = device
        .read_pixels(Some(shadow.framebuffer()), Attachment::Depth, Viewport::new(0, 0, 1, 1))
        .unwrap();
    assert_eq!(raw, vec![0.75]);
}
