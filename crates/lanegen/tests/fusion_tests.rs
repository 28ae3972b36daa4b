use lanegen::{
    dataflow::{NodeKind, build::build, fuse::fuse},
    parse::parse_unit,
    types::ElemType,
};

const SOFTMAX: &str = "package simd\n\nfunc BaseSoftmax[T Floats](out []T, in []T) {\n\tn := len(in)\n\tmaxv := in[0]\n\tfor i := 0; i < n; i++ {\n\t\tmaxv = max(maxv, in[i])\n\t}\n\tshifted := make([]T, n)\n\tfor i := 0; i < n; i++ {\n\t\tshifted[i] = in[i] - maxv\n\t}\n\tfor i := 0; i < n; i++ {\n\t\tout[i] = Exp(shifted[i])\n\t}\n\tsum := 0.0\n\tfor i := 0; i < n; i++ {\n\t\tsum += out[i]\n\t}\n\tfor i := 0; i < n; i++ {\n\t\tout[i] = out[i] / sum\n\t}\n}\n";

fn softmax_ir() -> lanegen::dataflow::IRFunction {
    let unit = parse_unit(SOFTMAX, "softmax_base.go").expect("parses");
    let mut ir = build(&unit.functions[0], ElemType::F32);
    fuse(&mut ir);
    ir
}

#[test]
fn softmax_chain_coalesces_into_one_group() {
    let ir = softmax_ir();
    let group = ir
        .groups
        .iter()
        .find(|g| g.pattern == "softmax")
        .expect("softmax post-pass forms a group");

    let alloc = ir
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Alloc)
        .expect("shifted allocation");
    assert!(group.members.contains(&alloc.id), "the temporary's allocation joins the group");
    assert_eq!(group.eliminated_allocs, vec![alloc.id]);

    // Root is the sum loop: the loop whose output is the scalar `sum`.
    let sum_loop = ir
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Loop && n.outputs.contains(&"sum".to_owned()))
        .expect("sum loop");
    assert_eq!(group.root, sum_loop.id);

    // Shift, exp, and sum loops are all members; the normalize loop stays
    // outside (it needs the completed sum).
    let member_loops = group
        .members
        .iter()
        .filter(|&&id| ir.node(id).kind == NodeKind::Loop)
        .count();
    assert_eq!(member_loops, 3);
}

#[test]
fn softmax_statistics_account_for_saved_passes() {
    let ir = softmax_ir();
    let stats = ir.stats();
    assert_eq!(stats.original_passes, 6, "five loops plus one allocation");
    assert!(stats.original_passes >= 4);
    assert_eq!(stats.eliminated_allocs, 1);
    assert_eq!(
        stats.fused_passes,
        stats.original_passes - 3,
        "two loop merges plus one eliminated allocation"
    );
}

#[test]
fn fusion_groups_are_sound() {
    let ir = softmax_ir();
    for group in &ir.groups {
        // Every loop-bearing member shares the group's range.
        if let Some(range) = &group.loop_range {
            for &id in &group.members {
                if let Some(r) = &ir.node(id).loop_range {
                    assert!(r.compatible(range), "member {id} disagrees with its group range");
                }
            }
        }
        // Membership is exclusive.
        for &id in &group.members {
            assert_eq!(ir.node(id).group, Some(group.id));
        }
        // The root is the largest member id bearing an execution position.
        let expected_root = group
            .members
            .iter()
            .copied()
            .filter(|&id| ir.node(id).exec_pos.is_some())
            .max()
            .or_else(|| group.members.iter().copied().max())
            .expect("groups are never empty");
        assert_eq!(group.root, expected_root);
        // Every eliminated allocation's write and read are members.
        for &alloc in &group.eliminated_allocs {
            let buf = ir.node(alloc).outputs[0].clone();
            let writer = ir
                .nodes
                .iter()
                .find(|n| n.kind == NodeKind::Store && n.outputs.contains(&buf))
                .expect("buffer write exists");
            let reader = ir
                .nodes
                .iter()
                .find(|n| n.kind == NodeKind::Load && n.inputs.contains(&buf))
                .expect("buffer read exists");
            assert!(group.members.contains(&writer.id));
            assert!(group.members.contains(&reader.id));
            assert!(writer.dead && reader.dead, "the round-trip through the buffer is dead");
        }
    }
}

#[test]
fn elementwise_feeding_a_reduction_fuses_in_loop() {
    let src = "package simd\n\nfunc BaseDot[T Floats](a []T, b []T) T {\n\tsum := 0.0\n\tn := len(a)\n\tfor i := 0; i < n; i++ {\n\t\tv := a[i] * b[i]\n\t\tsum += v\n\t}\n\treturn sum\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let mut ir = build(&unit.functions[0], ElemType::F32);
    fuse(&mut ir);
    let elem = ir
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Elementwise && n.outputs.contains(&"v".to_owned()))
        .expect("elementwise node");
    let red = ir
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Reduction)
        .expect("reduction node");
    assert!(elem.group.is_some());
    assert_eq!(elem.group, red.group, "producer and consumer share a group");
}

#[test]
fn single_consumer_allocations_are_eliminated() {
    let src = "package simd\n\nfunc BaseFill[T Floats](in []T) {\n\tn := len(in)\n\ttmp := make([]T, n)\n\tfor i := 0; i < n; i++ {\n\t\ttmp[i] = in[i] + in[i]\n\t}\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let mut ir = build(&unit.functions[0], ElemType::F32);
    fuse(&mut ir);
    let alloc = ir.nodes.iter().find(|n| n.kind == NodeKind::Alloc).expect("alloc node");
    let group = alloc.group.expect("alloc fused");
    assert!(ir.groups[group].eliminated_allocs.contains(&alloc.id));
}

#[test]
fn incompatible_ranges_do_not_fuse() {
    let src = "package simd\n\nfunc BaseTwo[T Floats](out []T, in []T) {\n\tn := len(in)\n\tm := len(out)\n\tfor i := 0; i < n; i++ {\n\t\tout[i] = in[i] + in[i]\n\t}\n\tfor i := 0; i < m; i++ {\n\t\tout[i] = out[i] * out[i]\n\t}\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let mut ir = build(&unit.functions[0], ElemType::F32);
    fuse(&mut ir);
    let loops: Vec<_> = ir.nodes.iter().filter(|n| n.kind == NodeKind::Loop).collect();
    assert_eq!(loops.len(), 2);
    assert!(
        loops[0].group.is_none() || loops[1].group.is_none() || loops[0].group != loops[1].group,
        "loops over different bounds stay separate"
    );
}
