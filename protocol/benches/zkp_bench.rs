// Zero-knowledge proof benchmarks for KEYLESS.
//
// Benchmarks the Poseidon Merkle tree rebuild and the Groth16 setup,
// proving and verification of the membership circuit over BN254 at a few
// circuit depths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ark_std::rand::{rngs::StdRng, SeedableRng};

use keyless_auth::crypto::hash::field_from_hex;
use keyless_auth::crypto::hash_credential;
use keyless_auth::registry::{hash_leaf, hash_pair, leaf_for, InclusionProof, MerkleTree};
use keyless_auth::zkp::{MembershipProver, MembershipWitness};

const DEPTHS: [usize; 3] = [4, 8, 16];

fn leaves(n: usize) -> Vec<ark_bn254::Fr> {
    (0..n)
        .map(|i| leaf_for(&hash_credential(format!("user-{i}@example.com").as_bytes())))
        .collect()
}

fn witness_for(tree: &MerkleTree, index: usize) -> MembershipWitness {
    let proof = InclusionProof::from_tree(tree, index).unwrap();
    MembershipWitness::from_inclusion_proof(&proof).unwrap()
}

fn bench_poseidon_pair(c: &mut Criterion) {
    let l = leaf_for("left");
    let r = leaf_for("right");
    c.bench_function("poseidon/hash_pair", |b| {
        b.iter(|| hash_pair(&l, &r));
    });
    c.bench_function("poseidon/hash_leaf", |b| {
        b.iter(|| hash_leaf(&l));
    });
}

fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle/build");
    group.sample_size(20);

    for n in [16usize, 256, 1024] {
        let input = leaves(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| MerkleTree::build(input.clone()).root());
        });
    }

    group.finish();
}

fn bench_groth16_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("zkp/groth16_setup");
    group.sample_size(10);

    for depth in DEPTHS {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(42);
                MembershipProver::setup(depth, &mut rng).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_groth16_prove(c: &mut Criterion) {
    let mut group = c.benchmark_group("zkp/groth16_prove");
    group.sample_size(10);

    for depth in DEPTHS {
        let mut rng = StdRng::seed_from_u64(42);
        let (prover, _verifier) = MembershipProver::setup(depth, &mut rng).unwrap();
        let tree = MerkleTree::build(leaves(1 << depth.min(6)));
        let witness = witness_for(&tree, 3);

        group.bench_with_input(BenchmarkId::from_parameter(depth), &witness, |b, w| {
            b.iter(|| prover.prove(w).unwrap());
        });
    }

    group.finish();
}

fn bench_groth16_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("zkp/groth16_verify");

    for depth in DEPTHS {
        let mut rng = StdRng::seed_from_u64(42);
        let (prover, verifier) = MembershipProver::setup(depth, &mut rng).unwrap();
        let tree = MerkleTree::build(leaves(1 << depth.min(6)));
        let proof = InclusionProof::from_tree(&tree, 3).unwrap();
        let witness = MembershipWitness::from_inclusion_proof(&proof).unwrap();
        let membership = prover.prove(&witness).unwrap();
        let root = field_from_hex(&proof.root).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(depth), &membership, |b, p| {
            b.iter(|| verifier.verify(p, &root, tree.depth()).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_poseidon_pair,
    bench_tree_build,
    bench_groth16_setup,
    bench_groth16_prove,
    bench_groth16_verify,
);
criterion_main!(benches);
