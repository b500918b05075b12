use coffre_cipher::{CbcDecryptor, CbcEncryptor, SingleShotCipher, XChaChaSealer};
use coffre_core::SymmetricAlgorithm;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

const KEY: [u8; 32] = [0x42; 32];
const IV: [u8; 16] = [0x24; 16];

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_cbc_encrypt(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut engine =
                CbcEncryptor::new(SymmetricAlgorithm::Aes256Cbc, &KEY, &IV).unwrap();
            let mut out = Vec::with_capacity(size + 16);
            engine.update(divan::black_box(&data), &mut out);
            engine.finish(&mut out);
            out
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_cbc_decrypt(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let mut ciphertext = Vec::with_capacity(size + 16);
    let mut engine = CbcEncryptor::new(SymmetricAlgorithm::Aes256Cbc, &KEY, &IV).unwrap();
    engine.update(&data, &mut ciphertext);
    engine.finish(&mut ciphertext);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut engine =
                CbcDecryptor::new(SymmetricAlgorithm::Aes256Cbc, &KEY, &IV).unwrap();
            let mut out = Vec::with_capacity(size + 16);
            engine.update(divan::black_box(&ciphertext), &mut out);
            engine.finish(&mut out).unwrap();
            out
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_seal_chunk(bencher: divan::Bencher, size: usize) {
    let sealer = XChaChaSealer::random();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| sealer.protect(divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_open_chunk(bencher: divan::Bencher, size: usize) {
    let sealer = XChaChaSealer::random();
    let sealed = sealer.protect(&make_data(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| sealer.unprotect(divan::black_box(&sealed)).unwrap());
}

fn main() {
    divan::main();
}
