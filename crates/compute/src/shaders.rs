/// Placeholder substituted with the configured workgroup size.
pub const WORKGROUP_SIZE_TOKEN: &str = "__WORKGROUP_SIZE__";

/// WGSL layout kernel: writes the grid position of every instance into a
/// flat `array<f32>` of `count * stride` floats.
///
/// `cube_dim` mirrors the host-side integer correction so both sides agree on
/// the grid size regardless of how the device rounds `pow`.
pub const LAYOUT_KERNEL: &str = r#"
struct Params {
    count: u32,
    stride: u32,
    row_pitch: u32,
    _pad: u32,
};

@group(0) @binding(0)
var<uniform> params: Params;

@group(0) @binding(1)
var<storage, read_write> positions: array<f32>;

fn cube_dim(count: u32) -> u32 {
    var dim = u32(ceil(pow(f32(count), 1.0 / 3.0)));
    loop {
        if (dim <= 1u || (dim - 1u) * (dim - 1u) * (dim - 1u) < count) {
            break;
        }
        dim = dim - 1u;
    }
    loop {
        if (dim * dim * dim >= count) {
            break;
        }
        dim = dim + 1u;
    }
    return dim;
}

fn normalize_axis(c: u32, dim: u32) -> f32 {
    return (f32(c) / f32(dim - 1u)) * 2.0 - 1.0;
}

fn write_at(index: u32, pos: vec3<f32>) {
    let base = index * params.stride;
    positions[base] = pos.x;
    positions[base + 1u] = pos.y;
    positions[base + 2u] = pos.z;
    if (params.stride == 4u) {
        positions[base + 3u] = 0.0;
    }
}

@compute @workgroup_size(__WORKGROUP_SIZE__)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let index = gid.y * params.row_pitch + gid.x;
    if (index >= params.count) {
        return;
    }

    let dim = cube_dim(params.count);
    var pos = vec3<f32>(0.0, 0.0, 0.0);
    if (dim > 1u) {
        let x = index % dim;
        let y = (index / dim) % dim;
        let z = index / (dim * dim);
        pos = vec3<f32>(
            normalize_axis(x, dim),
            normalize_axis(y, dim),
            normalize_axis(z, dim),
        );
    }
    write_at(index, pos);
}
"#;

/// Kernel source specialized for `workgroup_size`.
pub fn layout_kernel_source(workgroup_size: u32) -> String {
    LAYOUT_KERNEL.replace(WORKGROUP_SIZE_TOKEN, &workgroup_size.to_string())
}
