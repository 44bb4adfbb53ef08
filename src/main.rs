fn main() {
    println!("pgx-rs - Pharmacogenomic Phenotype Inference");
    println!();
    println!("RECOMMENDED: Use the profile tool for a single patient:");
    println!("  pgx_profile  - Per-chromosome VCFs -> metabolizer phenotype profile");
    println!();
    println!("Additional tools:");
    println!("  pgx_score    - Score every sample of one VCF (VCF -> TSV)");
    println!("  pgx_catalog  - Validate and print the variant catalog / gene regions");
    println!();
    println!("For help with each tool:");
    println!("  cargo run --bin pgx_profile -- --help");
    println!("  cargo run --bin pgx_score -- --help");
    println!("  cargo run --bin pgx_catalog -- --help");
    println!();
    println!("Quick start example:");
    println!("  cargo run --bin pgx_profile -- --vcf chr10.vcf.gz --vcf chr22.vcf.gz --sample NA12878");
}
