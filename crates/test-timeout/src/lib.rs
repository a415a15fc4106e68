//! Test attributes with a hard wall-clock budget.
//!
//! `#[tokio_timeout_test]` accepts an optional budget in seconds and an
//! optional `paused` flag, in any order:
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test]
//! #[test_timeout::tokio_timeout_test(10)]
//! #[test_timeout::tokio_timeout_test(10, paused)]
//! #[test_timeout::tokio_timeout_test(paused)]
//! ```
//!
//! `paused` starts the runtime with a frozen clock so timer-driven logic can
//! be asserted on exact virtual instants. The crate under test needs tokio's
//! `test-util` feature for that.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_BUDGET_SECS: u64 = 60;

struct TimeoutArgs {
    secs: u64,
    paused: bool,
}

enum TimeoutArg {
    Secs(LitInt),
    Flag(Ident),
}

impl Parse for TimeoutArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(LitInt) {
            input.parse().map(TimeoutArg::Secs)
        } else {
            input.parse().map(TimeoutArg::Flag)
        }
    }
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = TimeoutArgs {
            secs: DEFAULT_BUDGET_SECS,
            paused: false,
        };
        let items = Punctuated::<TimeoutArg, Token![,]>::parse_terminated(input)?;
        for item in items {
            match item {
                TimeoutArg::Secs(lit) => {
                    let secs: u64 = lit.base10_parse()?;
                    if secs == 0 {
                        return Err(syn::Error::new_spanned(
                            lit,
                            "timeout must be greater than zero",
                        ));
                    }
                    args.secs = secs;
                }
                TimeoutArg::Flag(flag) if flag == "paused" => args.paused = true,
                TimeoutArg::Flag(flag) => {
                    return Err(syn::Error::new_spanned(
                        flag,
                        "expected a timeout in seconds or `paused`",
                    ))
                }
            }
        }
        Ok(args)
    }
}

/// Runs `body` on a dedicated thread and fails the test if it does not
/// report back within `secs`.
fn watchdog(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let timeout_duration = std::time::Duration::from_secs(#secs);
        let (sender, receiver) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #body));
            let _ = sender.send(result);
        });
        match receiver.recv_timeout(timeout_duration) {
            Ok(Ok(_)) => {}
            Ok(Err(payload)) => std::panic::resume_unwind(payload),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread failed before reporting result")
            }
        }
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let TimeoutArgs { secs, paused } = parse_macro_input!(attr as TimeoutArgs);
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = attrs
        .into_iter()
        .filter(|attr| !path_is(attr, &["tokio", "test"]));

    let clock = if paused {
        quote! { .start_paused(true) }
    } else {
        quote! {}
    };
    let body = watchdog(
        secs,
        quote! {{
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                #clock
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(timeout_duration, async move #block)
                    .await
                    .expect("test timed out");
            });
        }},
    );

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #body
        }
    })
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let TimeoutArgs { secs, paused } = parse_macro_input!(attr as TimeoutArgs);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if paused {
        return syn::Error::new_spanned(&sig.ident, "`paused` only applies to async tests")
            .to_compile_error()
            .into();
    }
    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let attrs = attrs.into_iter().filter(|attr| !path_is(attr, &["test"]));
    let body = watchdog(secs, quote! { #block });

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #body
        }
    })
}

fn path_is(attr: &Attribute, expected: &[&str]) -> bool {
    let segments = &attr.path().segments;
    segments.len() == expected.len()
        && segments
            .iter()
            .zip(expected)
            .all(|(segment, name)| segment.ident == name)
}
