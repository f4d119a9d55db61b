//! Command-line signing and verification tool.
//!
//! Two verbs:
//!
//! ```text
//! pdfsign sign <in.pdf> <out.pdf> <cert> <key> [chain] [flags]
//! pdfsign verify <in.pdf> [flags]
//! ```
//!
//! `verify` prints one JSON object (`document_info`, `signers`, `valid`)
//! and exits 0 when every signature is valid, 1 otherwise.

use pades_oxide::signatures::{
    InMemorySigner, SignaturePlan, SignatureProfile, SignatureType, TsaConfig,
};
use pades_oxide::{Document, FieldValue, MdpPermission, VerifyOptions};
use std::process::ExitCode;
use std::time::Duration;

const USAGE: &str = "\
usage: pdfsign <command> [arguments]

commands:
  sign <in.pdf> <out.pdf> <cert> <key> [chain]
      -name <text>          signer name
      -reason <text>        reason for signing
      -location <text>      signing location
      -contact <text>       contact information
      -certType <type>      CertificationSignature | ApprovalSignature | DocumentTimestamp
      -perm <1|2|3>         DocMDP permission for certification signatures
      -tsa <url>            RFC 3161 timestamp authority
      -profile <name>       PAdES_B | PAdES_B_T | PAdES_B_LT
      -field <name=value>   set a form field before signing (repeatable)

  verify <in.pdf>
      -external                     enable live OCSP/CRL checks
      -require-digital-signature    require the digitalSignature key usage (default true)
      -require-non-repudiation      require the nonRepudiation key usage
      -trust-signature-time         accept the claimed signing time
      -validate-timestamp-certs     verify TSA certificate chains (default true)
      -allow-untrusted-roots        tolerate self-signed roots
      -roots <file>                 PEM file of trusted root certificates
      -http-timeout <dur>           per-request timeout, e.g. 10s (default 10s)
";

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("sign") => run_sign(&args[1..]),
        Some("verify") => run_verify(&args[1..]),
        Some("-h") | Some("--help") | None => {
            print!("{}", USAGE);
            ExitCode::SUCCESS
        },
        Some(other) => {
            eprintln!("unknown command '{}'\n\n{}", other, USAGE);
            ExitCode::FAILURE
        },
    }
}

/// Split args into positional values and `-flag [value]` pairs.
fn split_flags(args: &[String]) -> Result<(Vec<String>, Vec<(String, Option<String>)>), String> {
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(name) = arg.strip_prefix('-') {
            if name == "h" || name == "-help" {
                return Err(USAGE.to_string());
            }
            match name.split_once('=') {
                Some((key, value)) => flags.push((key.to_string(), Some(value.to_string()))),
                None => {
                    // Boolean flags stand alone; value flags consume the next arg.
                    let takes_value = matches!(
                        name,
                        "name" | "reason" | "location" | "contact" | "certType" | "perm"
                            | "tsa" | "profile" | "field" | "roots" | "http-timeout"
                    );
                    let value = if takes_value {
                        iter.next().cloned()
                    } else {
                        None
                    };
                    flags.push((name.to_string(), value));
                },
            }
        } else {
            positional.push(arg.clone());
        }
    }
    Ok((positional, flags))
}

fn parse_bool(value: &Option<String>) -> bool {
    match value.as_deref() {
        None => true,
        Some("true") | Some("1") => true,
        _ => false,
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    if let Some(ms) = text.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = text.strip_suffix('s') {
        return secs.parse().ok().map(Duration::from_secs);
    }
    text.parse().ok().map(Duration::from_secs)
}

/// Load one or more certificates from a PEM or DER file.
fn load_certificates(path: &str) -> Result<Vec<Vec<u8>>, String> {
    use der::Encode;
    let data = std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path, e))?;
    if data.starts_with(b"-----BEGIN") {
        let certs = x509_cert::Certificate::load_pem_chain(&data)
            .map_err(|e| format!("unreadable certificate PEM {}: {}", path, e))?;
        if certs.is_empty() {
            return Err(format!("{} contains no certificates", path));
        }
        certs
            .iter()
            .map(|c| c.to_der().map_err(|e| format!("certificate re-encode failed: {}", e)))
            .collect()
    } else {
        Ok(vec![data])
    }
}

fn run_sign(args: &[String]) -> ExitCode {
    let (positional, flags) = match split_flags(args) {
        Ok(parsed) => parsed,
        Err(usage) => {
            print!("{}", usage);
            return ExitCode::SUCCESS;
        },
    };
    if positional.len() < 4 {
        eprintln!("sign: expected <in.pdf> <out.pdf> <cert> <key> [chain]\n\n{}", USAGE);
        return ExitCode::FAILURE;
    }
    let (input, output, cert_path, key_path) =
        (&positional[0], &positional[1], &positional[2], &positional[3]);
    let chain_path = positional.get(4);

    let flag = |key: &str| flags.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
    let text_flag = |key: &str| flag(key).flatten();

    let signature_type = match text_flag("certType") {
        Some(name) => match SignatureType::from_name(&name) {
            Some(t) => t,
            None => {
                eprintln!("sign: unknown certType '{}'", name);
                return ExitCode::FAILURE;
            },
        },
        None => SignatureType::Approval,
    };
    let profile = match text_flag("profile") {
        Some(name) => match SignatureProfile::from_name(&name) {
            Some(p) => p,
            None => {
                eprintln!("sign: unknown profile '{}'", name);
                return ExitCode::FAILURE;
            },
        },
        None => SignatureProfile::PadesB,
    };

    let result = (|| -> pades_oxide::Result<()> {
        let mut doc = Document::open(input)?;

        for (_, value) in flags.iter().filter(|(k, _)| k == "field") {
            let Some((name, value)) = value.as_deref().and_then(|v| v.split_once('=')) else {
                return Err(pades_oxide::Error::InvalidPdf(format!(
                    "-field expects name=value, got '{}'",
                    value.clone().unwrap_or_default()
                )));
            };
            doc.set_field(name, FieldValue::Text(value.to_string()));
        }

        let mut plan = match signature_type {
            SignatureType::DocumentTimestamp => {
                let tsa = text_flag("tsa").ok_or_else(|| {
                    pades_oxide::Error::TimestampRequired("DocumentTimestamp".to_string())
                })?;
                SignaturePlan::document_timestamp(TsaConfig::new(tsa))
            },
            _ => {
                let certs = load_certificates(cert_path)
                    .map_err(pades_oxide::Error::Certificate)?;
                let key_data = std::fs::read(key_path)?;
                let signer = InMemorySigner::load(&key_data)?;
                let mut chain: Vec<Vec<u8>> = certs[1..].to_vec();
                if let Some(path) = chain_path {
                    chain.extend(load_certificates(path).map_err(pades_oxide::Error::Certificate)?);
                }
                let mut plan =
                    SignaturePlan::new(std::sync::Arc::new(signer), certs[0].clone())
                        .with_chain(chain)
                        .with_profile(profile);
                if let Some(tsa) = text_flag("tsa") {
                    plan = plan.with_tsa(TsaConfig::new(tsa));
                }
                if signature_type == SignatureType::Certification {
                    let permission = text_flag("perm")
                        .and_then(|p| p.parse::<i64>().ok())
                        .and_then(MdpPermission::from_p_value)
                        .unwrap_or(MdpPermission::AllowFormFilling);
                    plan = plan.certification(permission);
                }
                plan
            },
        };
        if let Some(name) = text_flag("name") {
            plan = plan.with_name(name);
        }
        if let Some(reason) = text_flag("reason") {
            plan = plan.with_reason(reason);
        }
        if let Some(location) = text_flag("location") {
            plan = plan.with_location(location);
        }
        if let Some(contact) = text_flag("contact") {
            plan = plan.with_contact_info(contact);
        }

        doc.add_signature(plan);
        let signed = doc.finalize()?;
        signed.save(output)?;
        for record in &signed.signatures {
            log::info!(
                "wrote {} ({}) covering bytes {:?}",
                record.field_name,
                record.sub_filter,
                record.byte_range
            );
        }
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sign: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run_verify(args: &[String]) -> ExitCode {
    let (positional, flags) = match split_flags(args) {
        Ok(parsed) => parsed,
        Err(usage) => {
            print!("{}", usage);
            return ExitCode::SUCCESS;
        },
    };
    let Some(input) = positional.first() else {
        eprintln!("verify: expected <in.pdf>\n\n{}", USAGE);
        return ExitCode::FAILURE;
    };

    let mut options = VerifyOptions::default();
    for (key, value) in &flags {
        match key.as_str() {
            "external" => options.external_checks = parse_bool(value),
            "require-digital-signature" => options.require_digital_signature = parse_bool(value),
            "require-non-repudiation" => options.require_non_repudiation = parse_bool(value),
            "trust-signature-time" => options.trust_signature_time = parse_bool(value),
            "validate-timestamp-certs" => {
                options.validate_timestamp_certificates = parse_bool(value)
            },
            "allow-untrusted-roots" => options.allow_untrusted_roots = parse_bool(value),
            "roots" => match value.as_deref().map(load_certificates) {
                Some(Ok(roots)) => options.trusted_roots.extend(roots),
                Some(Err(e)) => {
                    eprintln!("verify: {}", e);
                    return ExitCode::FAILURE;
                },
                None => {
                    eprintln!("verify: -roots expects a file path");
                    return ExitCode::FAILURE;
                },
            },
            "http-timeout" => match value.as_deref().and_then(parse_duration) {
                Some(timeout) => options.network.timeout = timeout,
                None => {
                    eprintln!("verify: bad -http-timeout value");
                    return ExitCode::FAILURE;
                },
            },
            other => {
                eprintln!("verify: unknown flag -{}\n\n{}", other, USAGE);
                return ExitCode::FAILURE;
            },
        }
    }

    let report = match Document::open(input).and_then(|doc| doc.verify(options)) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("verify: {}", e);
            return ExitCode::FAILURE;
        },
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("verify: cannot serialize report: {}", e);
            return ExitCode::FAILURE;
        },
    }
    if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
