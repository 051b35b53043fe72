use crate::{Options, TetMeshData};

/*
 * Setup code shared between unit and integration tests.
 */

/// Default parameters with gravity switched off.
pub fn zero_gravity_options() -> Options {
    Options {
        grav: [0.0; 3],
        ..Default::default()
    }
}

pub fn make_one_tet_mesh() -> TetMeshData {
    TetMeshData {
        x_rest: vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ],
        faces: vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
        tets: vec![[0, 1, 2, 3]],
    }
}

pub fn make_three_tet_mesh_with_verts(verts: Vec<[f64; 3]>) -> TetMeshData {
    TetMeshData {
        x_rest: verts,
        faces: vec![],
        tets: vec![[2, 5, 4, 0], [2, 3, 5, 0], [0, 1, 3, 5]],
    }
}

pub fn make_three_tet_mesh() -> TetMeshData {
    make_three_tet_mesh_with_verts(vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 0.0, 2.0],
        [1.0, 0.0, 2.0],
    ])
}
